//! Terminal rendering of conversation messages (markdown with framed code blocks).

use chrono::{DateTime, Local};
use pulldown_cmark::{CodeBlockKind, Event, Parser, Tag};

use crate::conversation::{Message, Sender};

const DEFAULT_CODE_LANGUAGE: &str = "javascript";

/// Language label for a code block: first word of the fence info string.
fn code_language(kind: &CodeBlockKind) -> String {
    let info = match kind {
        CodeBlockKind::Fenced(info) => &**info,
        CodeBlockKind::Indented => "",
    };
    info.split_whitespace()
        .next()
        .map(|word| {
            word.chars()
                .take_while(|c| c.is_alphanumeric() || *c == '_')
                .collect::<String>()
        })
        .filter(|lang| !lang.is_empty())
        .unwrap_or_else(|| DEFAULT_CODE_LANGUAGE.to_string())
}

fn ensure_line_start(out: &mut String) {
    if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
}

fn push_code_block(out: &mut String, lang: &str, body: &str) {
    ensure_line_start(out);
    out.push_str("┌─ ");
    out.push_str(lang);
    out.push('\n');
    for line in body.strip_suffix('\n').unwrap_or(body).lines() {
        out.push_str("│ ");
        out.push_str(line);
        out.push('\n');
    }
    out.push_str("└─\n");
}

/// Render markdown to plain terminal text.
pub fn render_markdown(text: &str) -> String {
    let mut out = String::new();
    // one entry per open list: next number for ordered lists
    let mut lists: Vec<Option<u64>> = Vec::new();
    let mut code: Option<(String, String)> = None;

    for event in Parser::new(text) {
        match event {
            Event::Start(Tag::CodeBlock(kind)) => {
                code = Some((code_language(&kind), String::new()));
            }
            Event::End(Tag::CodeBlock(_)) => {
                if let Some((lang, body)) = code.take() {
                    push_code_block(&mut out, &lang, &body);
                }
            }
            Event::Text(t) => match code.as_mut() {
                Some((_, body)) => body.push_str(&t),
                None => out.push_str(&t),
            },
            Event::Code(t) => {
                out.push('`');
                out.push_str(&t);
                out.push('`');
            }
            Event::Html(h) => out.push_str(&h),
            Event::Start(Tag::Paragraph) => {
                if lists.is_empty() && !out.is_empty() {
                    ensure_line_start(&mut out);
                    if !out.ends_with("\n\n") {
                        out.push('\n');
                    }
                }
            }
            Event::End(Tag::Paragraph) => ensure_line_start(&mut out),
            Event::Start(Tag::Heading(level, _, _)) => {
                ensure_line_start(&mut out);
                out.push_str(&"#".repeat(level as usize));
                out.push(' ');
            }
            Event::End(Tag::Heading(..)) => out.push('\n'),
            Event::Start(Tag::BlockQuote) => {
                ensure_line_start(&mut out);
                out.push_str("> ");
            }
            Event::Start(Tag::List(first)) => {
                ensure_line_start(&mut out);
                lists.push(first);
            }
            Event::End(Tag::List(_)) => {
                lists.pop();
            }
            Event::Start(Tag::Item) => {
                ensure_line_start(&mut out);
                let depth = lists.len().saturating_sub(1);
                out.push_str(&"  ".repeat(depth));
                match lists.last_mut() {
                    Some(Some(n)) => {
                        out.push_str(&format!("{}. ", n));
                        *n += 1;
                    }
                    _ => out.push_str("• "),
                }
            }
            Event::End(Tag::Item) => ensure_line_start(&mut out),
            Event::SoftBreak | Event::HardBreak => out.push('\n'),
            Event::Rule => {
                ensure_line_start(&mut out);
                out.push_str("────\n");
            }
            _ => {}
        }
    }
    out.trim_end().to_string()
}

/// One message as printed in the conversation: sender, time, then the rendered body.
pub fn render_message(message: &Message, at: DateTime<Local>) -> String {
    let who = match message.sender {
        Sender::Sent => "you",
        Sender::Received => "bot",
    };
    format!(
        "[{}] {}:\n{}",
        at.format("%H:%M"),
        who,
        render_markdown(&message.text)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fenced_code_is_framed_with_language() {
        let out = render_markdown("Try:\n\n```python\nprint(1)\n```\n");
        assert_eq!(out, "Try:\n┌─ python\n│ print(1)\n└─");
    }

    #[test]
    fn code_without_language_defaults_to_javascript() {
        let out = render_markdown("```\nlet a = 1;\n```");
        assert!(out.starts_with("┌─ javascript\n"));
    }

    #[test]
    fn inline_code_and_lists() {
        let out = render_markdown("Use `ls`:\n\n- one\n- two\n\n1. a\n2. b");
        assert!(out.contains("Use `ls`:"));
        assert!(out.contains("• one\n• two"));
        assert!(out.contains("1. a\n2. b"));
    }

    #[test]
    fn heading_keeps_level_marker() {
        assert_eq!(render_markdown("## Summary"), "## Summary");
    }

    #[test]
    fn message_has_sender_and_time() {
        let at = Local::now();
        let rendered = render_message(&Message::received("hi"), at);
        assert_eq!(rendered, format!("[{}] bot:\nhi", at.format("%H:%M")));
    }
}
