//! 编码未知的文本解码：按固定顺序逐个尝试，首个成功者胜出。

use std::fmt;

use encoding_rs::{Encoding, SHIFT_JIS, UTF_8, UTF_16BE, UTF_16LE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextEncoding {
    Utf8,
    Utf16,
    ShiftJis,
}

/// AB 线 `.ini` 的尝试顺序。
pub const AB_LINE_ENCODINGS: [TextEncoding; 3] = [
    TextEncoding::Utf8,
    TextEncoding::Utf16,
    TextEncoding::ShiftJis,
];

/// dBASE 字符字段的尝试顺序（UTF-16 不会出现在定长字段里）。
pub const DBF_ENCODINGS: [TextEncoding; 2] = [TextEncoding::Utf8, TextEncoding::ShiftJis];

impl TextEncoding {
    pub fn label(self) -> &'static str {
        match self {
            Self::Utf8 => "UTF-8",
            Self::Utf16 => "UTF-16",
            Self::ShiftJis => "Shift_JIS",
        }
    }

    /// 严格解码，出现非法序列时返回 `None`。
    pub fn decode(self, bytes: &[u8]) -> Option<String> {
        match self {
            Self::Utf8 => {
                let body = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(bytes);
                // UTF-16 的 ASCII 文本同样是合法 UTF-8，靠 NUL 字节区分。
                if body.contains(&0) {
                    return None;
                }
                strict(UTF_8, body)
            }
            Self::Utf16 => {
                let (encoding, body) = match bytes {
                    [0xFF, 0xFE, rest @ ..] => (UTF_16LE, rest),
                    [0xFE, 0xFF, rest @ ..] => (UTF_16BE, rest),
                    _ if bytes.contains(&0) => (guess_utf16_byte_order(bytes), bytes),
                    _ => return None,
                };
                if body.len() % 2 != 0 {
                    return None;
                }
                strict(encoding, body)
            }
            Self::ShiftJis => strict(SHIFT_JIS, bytes),
        }
    }
}

impl fmt::Display for TextEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedText {
    pub encoding: TextEncoding,
    pub text: String,
}

/// 依次尝试 `order` 中的编码。
pub fn decode_with(bytes: &[u8], order: &[TextEncoding]) -> Option<DecodedText> {
    order.iter().find_map(|&encoding| {
        encoding
            .decode(bytes)
            .map(|text| DecodedText { encoding, text })
    })
}

pub fn decode_text(bytes: &[u8]) -> Option<DecodedText> {
    decode_with(bytes, &AB_LINE_ENCODINGS)
}

fn strict(encoding: &'static Encoding, bytes: &[u8]) -> Option<String> {
    encoding
        .decode_without_bom_handling_and_without_replacement(bytes)
        .map(|text| text.into_owned())
}

/// ASCII 为主的 UTF-16 文本中，高位字节为 0：小端落在奇数下标，大端落在偶数下标。
fn guess_utf16_byte_order(bytes: &[u8]) -> &'static Encoding {
    let (mut even, mut odd) = (0usize, 0usize);
    for (index, byte) in bytes.iter().enumerate() {
        if *byte == 0 {
            if index % 2 == 0 {
                even += 1;
            } else {
                odd += 1;
            }
        }
    }
    if even > odd { UTF_16BE } else { UTF_16LE }
}
