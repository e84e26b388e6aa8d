//! SSE 事件
//!
//! 每个片段一个 data 事件。axum 的 Event::data 会把换行拆成多行 data 字段，因此片段先转义：
//! `\` → `\\`、换行 → `\n`、回车 → `\r`（均为两个字符），一个片段始终是一帧，unescape 可完整还原。

use axum::response::sse::Event;

/// 转义片段中的反斜杠与换行
pub fn escape(fragment: &str) -> String {
    let mut out = String::with_capacity(fragment.len());
    for c in fragment.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            _ => out.push(c),
        }
    }
    out
}

/// escape 的逆操作；无法识别的转义原样保留
pub fn unescape(payload: &str) -> String {
    let mut out = String::with_capacity(payload.len());
    let mut chars = payload.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

/// 叙述片段
pub fn fragment_event(fragment: &str) -> Event {
    Event::default().data(escape(fragment))
}

/// 注释事件（EventSource 客户端会忽略）
pub fn comment_event(text: &str) -> Event {
    Event::default().comment(escape(text))
}

/// 从一段响应体中取出全部数据帧并还原片段
pub fn parse_data_frames(body: &str) -> Vec<String> {
    body.split("\n\n")
        .filter_map(|frame| frame.strip_prefix("data: "))
        .map(unescape)
        .collect()
}
