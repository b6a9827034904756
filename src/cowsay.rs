//! `/cowsay` renderer: wraps text in a speech bubble above a fixed ASCII cow.

const WRAP_WIDTH: usize = 40;

const COW: &str = r#"        \   ^__^
         \  (oo)\_______
            (__)\       )\/\
                ||----w |
                ||     ||"#;

fn wrap(text: &str) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        if current.is_empty() {
            current.push_str(word);
        } else if current.len() + 1 + word.len() <= WRAP_WIDTH {
            current.push(' ');
            current.push_str(word);
        } else {
            lines.push(std::mem::take(&mut current));
            current.push_str(word);
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    if lines.is_empty() {
        lines.push(String::new());
    }
    lines
}

fn bubble(lines: &[String]) -> String {
    let width = lines.iter().map(|l| l.len()).max().unwrap_or(0);
    let border = "_".repeat(width + 2);
    let floor = "-".repeat(width + 2);

    let mut out = String::new();
    out.push_str(&format!(" {border}\n"));

    if lines.len() == 1 {
        out.push_str(&format!("< {:width$} >\n", lines[0], width = width));
    } else {
        for (i, line) in lines.iter().enumerate() {
            let (l, r) = if i == 0 {
                ("/", "\\")
            } else if i == lines.len() - 1 {
                ("\\", "/")
            } else {
                ("|", "|")
            };
            out.push_str(&format!("{l} {:width$} {r}\n", line, width = width));
        }
    }

    out.push_str(&format!(" {floor}"));
    out
}

/// Renders `text` as a cowsay speech bubble, ready to drop into a fenced
/// code block.
pub fn say(text: &str) -> String {
    let lines = wrap(text);
    format!("{}\n{}", bubble(&lines), COW)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_message_renders_single_line_bubble() {
        let output = say("moo");
        assert!(output.contains("< moo >"));
        assert!(output.contains("^__^"));
    }

    #[test]
    fn long_message_wraps_across_multiple_lines() {
        let text = "a ".repeat(60);
        assert!(wrap(&text).len() > 1);
    }

    #[test]
    fn empty_message_still_renders_a_bubble() {
        let output = say("");
        assert!(output.contains("^__^"));
    }
}
