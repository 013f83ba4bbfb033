use unicode_width::UnicodeWidthStr;

use burrow_core::SessionInfo;

use crate::color;

const HEADERS: [&str; 6] = ["Name", "PID", "Clients", "Status", "CWD", "Command"];

pub struct TableFormatter {
    widths: [usize; 6],
}

impl TableFormatter {
    pub fn new(sessions: &[SessionInfo]) -> Self {
        // Minimum widths = header label lengths
        let mut widths = HEADERS.map(display_width);
        for session in sessions {
            for (width, cell) in widths.iter_mut().zip(Self::cells(session)) {
                *width = (*width).max(display_width(&cell));
            }
        }
        Self { widths }
    }

    pub fn print_table(&self, sessions: &[SessionInfo]) {
        println!("{}", self.border('┌', '┬', '┐'));
        println!("{}", self.header_row());
        println!("{}", self.border('├', '┼', '┤'));
        for session in sessions {
            println!("{}", self.row(session));
        }
        println!("{}", self.border('└', '┴', '┘'));
    }

    fn cells(session: &SessionInfo) -> [String; 6] {
        let command = if session.command.is_empty() {
            "(shell)".to_string()
        } else {
            session.command.clone()
        };
        [
            session.name.clone(),
            session.pid.map_or("-".to_string(), |pid| pid.to_string()),
            session.clients.to_string(),
            session.status.to_string(),
            session.cwd.clone(),
            command,
        ]
    }

    fn row(&self, session: &SessionInfo) -> String {
        let [name, pid, clients, status, cwd, command] = Self::cells(session);
        let sep = color::muted("│");
        format!(
            "{sep} {} {sep} {} {sep} {} {sep} {} {sep} {} {sep} {} {sep}",
            color::ice(&pad(&name, self.widths[0])),
            pad(&pid, self.widths[1]),
            pad(&clients, self.widths[2]),
            color::status(&pad(&status, self.widths[3])),
            pad(&cwd, self.widths[4]),
            pad(&command, self.widths[5]),
        )
    }

    fn header_row(&self) -> String {
        let sep = color::muted("│");
        let cells: Vec<String> = HEADERS
            .iter()
            .zip(self.widths)
            .map(|(label, width)| color::bold(&pad(label, width)))
            .collect();
        format!("{sep} {} {sep}", cells.join(&format!(" {sep} ")))
    }

    fn border(&self, left: char, mid: char, right: char) -> String {
        let segments: Vec<String> = self.widths.iter().map(|w| "─".repeat(w + 2)).collect();
        color::muted(&format!(
            "{left}{}{right}",
            segments.join(&mid.to_string())
        ))
    }
}

/// Compute the terminal display width of a string.
///
/// Wide characters (CJK, emoji) count as 2 columns.
pub(crate) fn display_width(s: &str) -> usize {
    UnicodeWidthStr::width(s)
}

/// Pad a string to a minimum display width without truncating.
pub(crate) fn pad(s: &str, min_width: usize) -> String {
    let width = display_width(s);
    if width >= min_width {
        s.to_string()
    } else {
        format!("{}{}", s, " ".repeat(min_width - width))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burrow_core::SessionStatus;

    fn session(name: &str, command: &str) -> SessionInfo {
        SessionInfo {
            name: name.to_string(),
            command: command.to_string(),
            cwd: "/home/dev/project".to_string(),
            pid: Some(4242),
            created_at: "2026-01-01T00:00:00Z".to_string(),
            clients: 2,
            status: SessionStatus::Running,
        }
    }

    #[test]
    fn test_pad_shorter_than_width() {
        assert_eq!(pad("hi", 5), "hi   ");
    }

    #[test]
    fn test_pad_longer_than_width() {
        // Never truncates
        assert_eq!(pad("hello world", 5), "hello world");
    }

    #[test]
    fn test_display_width_cjk() {
        assert_eq!(display_width("日本"), 4);
    }

    #[test]
    fn test_pad_with_wide_chars() {
        assert_eq!(pad("日本", 6), "日本  ");
    }

    #[test]
    fn test_widths_start_at_header_labels() {
        let table = TableFormatter::new(&[]);
        assert_eq!(table.widths, [4, 3, 7, 6, 3, 7]);
    }

    #[test]
    fn test_widths_grow_with_content() {
        let table = TableFormatter::new(&[session("日本語-session", "cargo watch -x test")]);
        assert_eq!(table.widths[0], display_width("日本語-session"));
        assert_eq!(table.widths[4], "/home/dev/project".len());
        assert_eq!(table.widths[5], "cargo watch -x test".len());
    }

    #[test]
    fn test_cells_for_default_shell_and_missing_pid() {
        let mut info = session("dev", "");
        info.pid = None;
        let cells = TableFormatter::cells(&info);
        assert_eq!(cells[1], "-");
        assert_eq!(cells[2], "2");
        assert_eq!(cells[3], "running");
        assert_eq!(cells[5], "(shell)");
    }

    #[test]
    fn test_border_spans_every_column() {
        crate::color::set_no_color();
        let table = TableFormatter::new(&[]);
        let border = table.border('┌', '┬', '┐');
        assert!(border.starts_with('┌'));
        assert!(border.ends_with('┐'));
        assert_eq!(border.matches('┬').count(), 5);
        // widths + 2 padding each + 7 border glyphs
        assert_eq!(display_width(&border), (4 + 3 + 7 + 6 + 3 + 7) + 12 + 7);
    }
}
