//! 最小 INI 读取器：`[节]` + `键 = 值` / `键: 值`。
//!
//! 节名区分大小写，键名不区分；`#`、`;` 开头为注释行；
//! 缩进行是上一个值的续行。重复的节或键视为语法错误。

use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum IniError {
    #[error("line {line}: entry appears before any section header")]
    EntryBeforeSection { line: usize },
    #[error("line {line}: malformed section header `{content}`")]
    BadSectionHeader { line: usize, content: String },
    #[error("line {line}: duplicate section [{name}]")]
    DuplicateSection { line: usize, name: String },
    #[error("line {line}: duplicate key `{key}` in [{section}]")]
    DuplicateKey {
        line: usize,
        section: String,
        key: String,
    },
    #[error("line {line}: expected `key = value`, found `{content}`")]
    Malformed { line: usize, content: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IniSection {
    pub name: String,
    entries: Vec<(String, String)>,
}

impl IniSection {
    fn new(name: String) -> Self {
        Self {
            name,
            entries: Vec::new(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        let key = key.to_lowercase();
        self.entries
            .iter()
            .find(|(existing, _)| *existing == key)
            .map(|(_, value)| value.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IniDocument {
    sections: Vec<IniSection>,
}

impl IniDocument {
    pub fn parse(text: &str) -> Result<Self, IniError> {
        let text = text.strip_prefix('\u{feff}').unwrap_or(text);
        let mut document = IniDocument::default();

        for (index, raw) in text.lines().enumerate() {
            let line = index + 1;
            let trimmed = raw.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with(';') {
                continue;
            }

            let indented = raw.starts_with([' ', '\t']);
            if indented {
                if let Some((_, value)) = document
                    .sections
                    .last_mut()
                    .and_then(|section| section.entries.last_mut())
                {
                    value.push('\n');
                    value.push_str(trimmed);
                    continue;
                }
            }

            if trimmed.starts_with('[') {
                let name = trimmed
                    .strip_prefix('[')
                    .and_then(|rest| rest.strip_suffix(']'))
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                    .ok_or_else(|| IniError::BadSectionHeader {
                        line,
                        content: trimmed.to_string(),
                    })?;
                if document.section(name).is_some() {
                    return Err(IniError::DuplicateSection {
                        line,
                        name: name.to_string(),
                    });
                }
                document.sections.push(IniSection::new(name.to_string()));
                continue;
            }

            let Some(split_at) = trimmed.find(['=', ':']) else {
                return Err(IniError::Malformed {
                    line,
                    content: trimmed.to_string(),
                });
            };
            let key = trimmed[..split_at].trim().to_lowercase();
            let value = trimmed[split_at + 1..].trim().to_string();
            if key.is_empty() {
                return Err(IniError::Malformed {
                    line,
                    content: trimmed.to_string(),
                });
            }
            let Some(section) = document.sections.last_mut() else {
                return Err(IniError::EntryBeforeSection { line });
            };
            if section.entries.iter().any(|(existing, _)| *existing == key) {
                return Err(IniError::DuplicateKey {
                    line,
                    section: section.name.clone(),
                    key,
                });
            }
            section.entries.push((key, value));
        }

        Ok(document)
    }

    pub fn section(&self, name: &str) -> Option<&IniSection> {
        self.sections.iter().find(|section| section.name == name)
    }
}
