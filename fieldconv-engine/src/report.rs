use std::path::PathBuf;

use serde::Serialize;

use crate::convert::ItemOutcome;

/// 圃场目录的最终处置。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FieldDisposition {
    /// 原内容已被转换结果替换。
    Replaced,
    /// 没有任何输出，目录保持原样。
    SkippedEmpty,
    /// 没有任何输出，但按配置仍清空了目录。
    Emptied,
    /// 目录级错误（列目录、暂存、替换失败），目录保持原样。
    Failed { error: String },
}

#[derive(Debug, Serialize)]
pub struct FieldReport {
    pub path: PathBuf,
    pub disposition: FieldDisposition,
    pub items: Vec<ItemOutcome>,
}

impl FieldReport {
    pub fn converted(&self) -> usize {
        self.items.iter().filter(|item| item.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.items.len() - self.converted()
    }
}

#[derive(Debug, Serialize)]
pub struct BatchReport {
    pub root: PathBuf,
    /// 启动时修复的中断残留数量。
    pub recovered: usize,
    pub fields: Vec<FieldReport>,
}

impl BatchReport {
    pub fn converted(&self) -> usize {
        self.fields.iter().map(FieldReport::converted).sum()
    }

    pub fn failed(&self) -> usize {
        self.fields.iter().map(FieldReport::failed).sum()
    }

    pub fn failures(&self) -> impl Iterator<Item = &ItemOutcome> {
        self.fields
            .iter()
            .flat_map(|field| field.items.iter())
            .filter(|item| !item.is_success())
    }

    pub fn field_errors(&self) -> impl Iterator<Item = (&PathBuf, &str)> {
        self.fields.iter().filter_map(|field| match &field.disposition {
            FieldDisposition::Failed { error } => Some((&field.path, error.as_str())),
            _ => None,
        })
    }

    pub fn is_clean(&self) -> bool {
        self.failed() == 0 && self.field_errors().next().is_none()
    }
}
