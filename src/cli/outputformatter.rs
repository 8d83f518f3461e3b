use terminal_size::{terminal_size, Height, Width};

use crate::actions::PendingAction;
use crate::report::RoleTable;

/// Corner label of the role grid.
const CORNER: &str = "user";

// Render the role grid as an ASCII table, one string per line.
// Headers are green when `color` is set; `pending` adds a count to the footer.
pub fn render_role_table<T: RoleTable + ?Sized>(table: &T, termw: usize, color: bool, pending: usize) -> Vec<String> {
    let cols: Vec<String> = std::iter::once(CORNER.to_string()).chain(table.column_headers().iter().cloned()).collect();
    let rows: Vec<Vec<String>> = table
        .row_headers()
        .iter()
        .zip(table.rendered_rows())
        .map(|(user, cells)| std::iter::once(user.clone()).chain(cells).collect())
        .collect();

    let mut lines = render_grid(&cols, &rows, termw, color);
    let mut summary = format!("users: {}, databases: {}", table.row_headers().len(), table.column_headers().len());
    if pending > 0 {
        summary.push_str(&format!(", pending: {}", pending));
    }
    lines.push(fit_line_to_width(&summary, termw));
    lines
}

pub fn print_role_table<T: RoleTable + ?Sized>(table: &T, pending: usize) {
    let termw = get_terminal_width();
    crate::tprintln!("[cli.outputformatter] detected terminal width={} columns", termw);
    for line in render_role_table(table, termw, true, pending) {
        println!("{}", line);
    }
}

/// Single column listing (databases, users, collections).
pub fn render_list(header: &str, items: &[String], termw: usize, color: bool) -> Vec<String> {
    let rows: Vec<Vec<String>> = items.iter().map(|i| vec![i.clone()]).collect();
    let mut lines = render_grid(&[header.to_string()], &rows, termw, color);
    lines.push(fit_line_to_width(&format!("rows: {}", items.len()), termw));
    lines
}

pub fn print_list(header: &str, items: &[String]) {
    for line in render_list(header, items, get_terminal_width(), true) {
        println!("{}", line);
    }
}

/// Staged actions, numbered in replay order.
pub fn render_pending(actions: &[PendingAction]) -> Vec<String> {
    if actions.is_empty() {
        return vec!["no pending changes".to_string()];
    }
    actions.iter().enumerate().map(|(i, a)| format!("{:>3}. {}", i + 1, a)).collect()
}

fn render_grid(cols: &[String], rows: &[Vec<String>], termw: usize, color: bool) -> Vec<String> {
    let mut widths: Vec<usize> = cols.iter().map(|s| visible_len(s).min(termw)).collect();
    for r in rows {
        for (i, cell) in r.iter().enumerate().take(cols.len()) {
            let w = visible_len(cell);
            if w > widths[i] { widths[i] = w.min(termw); }
        }
    }

    let sep = build_separator(&widths);
    let header = if color { build_row_header_colored(cols, &widths) } else { build_row(cols, &widths) };
    let mut lines = vec![fit_line_to_width(&sep, termw), fit_line_to_width(&header, termw), fit_line_to_width(&sep, termw)];
    for r in rows {
        lines.push(fit_line_to_width(&build_row(r, &widths), termw));
    }
    lines.push(fit_line_to_width(&sep, termw));
    lines
}

fn build_separator(widths: &[usize]) -> String {
    let mut s = String::from("+");
    for w in widths {
        s.push_str(&"-".repeat(*w + 2));
        s.push('+');
    }
    s
}

fn build_row(cells: &[String], widths: &[usize]) -> String {
    let mut s = String::from("|");
    for (i, w) in widths.iter().enumerate() {
        let text = truncate(cells.get(i).map(String::as_str).unwrap_or_default(), *w);
        s.push(' ');
        s.push_str(&text);
        s.push_str(&" ".repeat(w.saturating_sub(visible_len(&text))));
        s.push_str(" |");
    }
    s
}

// Header cells in green, padded by visible width.
fn build_row_header_colored(cells: &[String], widths: &[usize]) -> String {
    let mut s = String::from("|");
    for (i, w) in widths.iter().enumerate() {
        let text = truncate(cells.get(i).map(String::as_str).unwrap_or_default(), *w);
        s.push(' ');
        s.push_str(&format!("\x1b[32m{}\x1b[0m", text));
        s.push_str(&" ".repeat(w.saturating_sub(visible_len(&text))));
        s.push_str(" |");
    }
    s
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max { return s.to_string(); }
    if max <= 1 { return "…".to_string(); }
    s.chars().take(max - 1).collect::<String>() + "…"
}

// --- Terminal fitting & ANSI helpers ---

pub fn get_terminal_width() -> usize {
    match terminal_size() {
        Some((Width(w), Height(_))) if w > 8 => (w - 4) as usize,
        _ => 80,
    }
}

fn fit_line_to_width(s: &str, maxw: usize) -> String {
    if visible_len(s) <= maxw { return s.to_string(); }
    elide_middle(s, maxw)
}

// Byte length of an ANSI CSI sequence starting at `i`, or 0.
fn escape_len(s: &str, i: usize) -> usize {
    let bytes = s.as_bytes();
    if bytes.get(i) != Some(&0x1B) { return 0; }
    let mut j = i + 1;
    if bytes.get(j) == Some(&b'[') {
        j += 1;
        while j < bytes.len() {
            let b = bytes[j];
            j += 1;
            if b.is_ascii_alphabetic() { break; }
        }
    }
    j - i
}

fn visible_len(s: &str) -> usize {
    let mut i = 0;
    let mut count = 0;
    while let Some(ch) = s[i..].chars().next() {
        let esc = escape_len(s, i);
        if esc > 0 {
            i += esc;
            continue;
        }
        count += 1;
        i += ch.len_utf8();
    }
    count
}

// Keep the head and tail of a line around "...", dropping colour codes from the elided part.
fn elide_middle(s: &str, maxw: usize) -> String {
    if maxw <= 3 { return "…".repeat(maxw.min(1)); }
    let budget = maxw - 3;
    let front_keep = budget / 2;
    let back_keep = budget - front_keep;
    let plain = strip_ansi(s);
    let chars: Vec<char> = plain.chars().collect();
    let front: String = chars[..front_keep].iter().collect();
    let back: String = chars[chars.len() - back_keep..].iter().collect();
    format!("{}...{}", front, back)
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut i = 0;
    while let Some(ch) = s[i..].chars().next() {
        let esc = escape_len(s, i);
        if esc > 0 {
            i += esc;
            continue;
        }
        out.push(ch);
        i += ch.len_utf8();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::Role;
    use crate::model::RoleMatrix;

    fn matrix() -> RoleMatrix {
        let mut m = RoleMatrix::new(vec!["alice".into(), "bob".into()], vec!["sales".into(), "hr".into()]);
        m.set_role("alice", "sales", Some(Role::Read));
        m.set_role("bob", "hr", Some(Role::ReadWrite));
        m
    }

    #[test]
    fn role_grid_renders_plain() {
        let lines = render_role_table(&matrix(), 120, false, 0);
        assert_eq!(
            lines,
            vec![
                "+-------+-------+-----------+",
                "| user  | sales | hr        |",
                "+-------+-------+-----------+",
                "| alice | read  | -         |",
                "| bob   | -     | readWrite |",
                "+-------+-------+-----------+",
                "users: 2, databases: 2",
            ]
        );
    }

    #[test]
    fn footer_counts_pending_changes() {
        let lines = render_role_table(&matrix(), 120, true, 3);
        assert_eq!(lines.last().unwrap(), "users: 2, databases: 2, pending: 3");
        assert!(lines[1].contains("\x1b[32msales\x1b[0m"));
        assert_eq!(visible_len(&lines[1]), visible_len(&lines[0]));
    }

    #[test]
    fn long_lines_are_elided_to_width() {
        let wide = RoleMatrix::new(vec!["u".into()], (0..20).map(|i| format!("database_{i}")).collect());
        for line in render_role_table(&wide, 40, true, 0) {
            assert!(visible_len(&line) <= 40, "{line}");
        }
    }

    #[test]
    fn pending_and_lists() {
        assert_eq!(render_pending(&[]), vec!["no pending changes"]);
        let lines = render_pending(&[PendingAction::AddDatabase("ops".into())]);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("  1. "));
        let list = render_list("database", &["hr".to_string()], 80, false);
        assert_eq!(list[1], "| database |");
        assert_eq!(list.last().unwrap(), "rows: 1");
    }

    #[test]
    fn truncate_and_visible_len() {
        assert_eq!(truncate("abcdef", 4), "abc…");
        assert_eq!(truncate("ab", 4), "ab");
        assert_eq!(visible_len("\x1b[32mab\x1b[0m"), 2);
        assert_eq!(strip_ansi("\x1b[32mab\x1b[0mc"), "abc");
    }
}
