use super::{BoundedBuf, EngineError, HistoryFormat, TerminalEngine};

/// vt100 keeps a base character plus up to five combining marks per cell.
const MAX_CODEPOINTS_PER_CELL: usize = 6;

/// Longest grapheme cluster one cell can hold, in UTF-8.
const CLUSTER_BYTES: usize = MAX_CODEPOINTS_PER_CELL * 4;

/// Longest SGR vt100 writes between two cells: either `\x1b[m` or one
/// sequence carrying two truecolor specs and four attribute codes,
/// `\x1b[38;2;255;255;255;48;2;255;255;255;22;23;24;27m`.
const SGR_BYTES: usize = 48;

/// `\x1b[<row>;<col>H` with five-digit coordinates.
const CURSOR_MOVE_BYTES: usize = 14;

/// `\x1b[<n>X` closing a run of blank cells.
const ERASE_BYTES: usize = 8;

/// `<span style="...">` with every property set, plus `</span>`.
const SPAN_BYTES: usize = r#"<span style="color:#rrggbb;background-color:#rrggbb;font-weight:bold;font-style:italic;text-decoration:underline;"></span>"#.len();

/// Worst-case bytes one cell expands to, per output format.
///
/// Replay charges every cell a cursor move, an SGR and an erase on top of its
/// text, which covers whatever vt100 emits ahead of it. HTML charges a span per
/// cell and escapes each codepoint as `&quot;` at worst.
const TEXT_BYTES_PER_CELL: usize = CLUSTER_BYTES;
const REPLAY_BYTES_PER_CELL: usize = CLUSTER_BYTES + SGR_BYTES + CURSOR_MOVE_BYTES + ERASE_BYTES;
const HTML_BYTES_PER_CELL: usize = SPAN_BYTES + MAX_CODEPOINTS_PER_CELL * "&quot;".len();

/// Per-line allowance: a cursor move to the row start plus `\x1b[m\r\n`
/// for replay, `\n` otherwise.
const BYTES_PER_LINE: usize = CURSOR_MOVE_BYTES + 5;

/// Headers, footers and mode restoration sequences.
const OVERHEAD_BYTES: usize = 1024;

/// [`TerminalEngine`] backed by the `vt100` crate.
pub struct Vt100Engine {
    parser: vt100::Parser,
    fed: bool,
}

impl Vt100Engine {
    pub fn new(cols: u16, rows: u16, scrollback_lines: usize) -> Self {
        Self {
            parser: vt100::Parser::new(rows.max(1), cols.max(1), scrollback_lines),
            fed: false,
        }
    }

    fn size(&self) -> (u16, u16) {
        let (rows, cols) = self.parser.screen().size();
        (cols, rows)
    }

    /// Lines currently held in scrollback on the active grid.
    fn history_len(&mut self) -> usize {
        self.parser.set_scrollback(usize::MAX);
        let len = self.parser.screen().scrollback();
        self.parser.set_scrollback(0);
        len
    }

    fn reserve(&mut self, per_cell: usize) -> Result<BoundedBuf, EngineError> {
        let (cols, rows) = self.size();
        let lines = self.history_len().saturating_add(usize::from(rows));
        let limit = lines
            .saturating_mul(usize::from(cols))
            .saturating_mul(per_cell)
            .saturating_add(lines.saturating_mul(BYTES_PER_LINE))
            .saturating_add(OVERHEAD_BYTES);
        BoundedBuf::with_limit(limit)
    }

    /// Walk scrollback oldest-first, one screenful at a time.
    ///
    /// `visit` gets the screen scrolled back so that its first `count` rows
    /// are the next history lines. The view is restored to live afterwards.
    fn visit_history<F>(&mut self, mut visit: F) -> Result<(), EngineError>
    where
        F: FnMut(&vt100::Screen, u16) -> Result<(), EngineError>,
    {
        let rows = usize::from(self.parser.screen().size().0);
        self.parser.set_scrollback(usize::MAX);
        let mut offset = self.parser.screen().scrollback();
        let mut result = Ok(());
        while offset > 0 {
            self.parser.set_scrollback(offset);
            let count = offset.min(rows);
            result = visit(self.parser.screen(), count as u16);
            if result.is_err() {
                break;
            }
            offset -= count;
        }
        self.parser.set_scrollback(0);
        result
    }

    fn serialize_plain(&mut self) -> Result<Option<Vec<u8>>, EngineError> {
        let mut out = LineWriter::new(self.reserve(TEXT_BYTES_PER_CELL)?);
        let cols = self.size().0;

        self.visit_history(|screen, count| {
            for line in screen.rows(0, cols).take(usize::from(count)) {
                out.line(line.trim_end().as_bytes())?;
            }
            Ok(())
        })?;
        for line in self.parser.screen().rows(0, cols) {
            out.line(line.trim_end().as_bytes())?;
        }

        Ok(out.finish())
    }

    fn serialize_replay(&mut self) -> Result<Option<Vec<u8>>, EngineError> {
        if !self.fed {
            return Ok(None);
        }
        let mut out = self.reserve(REPLAY_BYTES_PER_CELL)?;
        let (cols, rows) = self.size();

        // The alternate screen has no scrollback of its own.
        if !self.parser.screen().alternate_screen() {
            let mut wrote_history = false;
            self.visit_history(|screen, count| {
                for row in screen.rows_formatted(0, cols).take(usize::from(count)) {
                    out.push(&row)?;
                    out.push(b"\x1b[m\r\n")?;
                    wrote_history = true;
                }
                Ok(())
            })?;
            if wrote_history {
                // Scroll history off the visible area before the redraw clears it.
                for _ in 0..rows {
                    out.push(b"\r\n")?;
                }
            }
        }

        out.push(&self.parser.screen().state_formatted())?;
        Ok(Some(out.into_inner()))
    }

    fn serialize_html(&mut self) -> Result<Option<Vec<u8>>, EngineError> {
        let mut out = LineWriter::new(self.reserve(HTML_BYTES_PER_CELL)?);
        let cols = self.size().0;

        self.visit_history(|screen, count| {
            for row in 0..count {
                let line = html_line(screen, row, cols);
                out.line(line.as_bytes())?;
            }
            Ok(())
        })?;
        let rows = self.parser.screen().size().0;
        for row in 0..rows {
            let line = html_line(self.parser.screen(), row, cols);
            out.line(line.as_bytes())?;
        }

        let Some(body) = out.finish() else {
            return Ok(None);
        };
        let mut doc = BoundedBuf::with_limit(body.len() + OVERHEAD_BYTES)?;
        doc.push_str("<pre class=\"burrow-history\">\n")?;
        doc.push(&body)?;
        doc.push_str("\n</pre>\n")?;
        Ok(Some(doc.into_inner()))
    }
}

impl TerminalEngine for Vt100Engine {
    fn feed(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        self.parser.process(bytes);
        self.fed = true;
    }

    fn resize(&mut self, cols: u16, rows: u16) {
        if self.size() == (cols, rows) || cols == 0 || rows == 0 {
            return;
        }
        self.parser.set_size(rows, cols);
    }

    fn cursor_position(&self) -> (u16, u16) {
        self.parser.screen().cursor_position()
    }

    fn serialize(&mut self, format: HistoryFormat) -> Result<Option<Vec<u8>>, EngineError> {
        match format {
            HistoryFormat::Plain => self.serialize_plain(),
            HistoryFormat::Replay => self.serialize_replay(),
            HistoryFormat::Html => self.serialize_html(),
        }
    }
}

/// Joins lines with `\n`, holding back blank lines until something follows
/// them so trailing blanks never reach the output.
struct LineWriter {
    out: BoundedBuf,
    pending_blank: usize,
    any_text: bool,
}

impl LineWriter {
    fn new(out: BoundedBuf) -> Self {
        Self {
            out,
            pending_blank: 0,
            any_text: false,
        }
    }

    fn line(&mut self, line: &[u8]) -> Result<(), EngineError> {
        if line.iter().all(|b| b.is_ascii_whitespace()) {
            self.pending_blank += 1;
            return Ok(());
        }
        if self.any_text {
            self.out.push(b"\n")?;
        }
        for _ in 0..self.pending_blank {
            self.out.push(b"\n")?;
        }
        self.pending_blank = 0;
        self.out.push(line)?;
        self.any_text = true;
        Ok(())
    }

    fn finish(self) -> Option<Vec<u8>> {
        self.any_text.then(|| self.out.into_inner())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CellStyle {
    fg: vt100::Color,
    bg: vt100::Color,
    bold: bool,
    italic: bool,
    underline: bool,
    inverse: bool,
}

impl CellStyle {
    fn of(cell: &vt100::Cell) -> Self {
        Self {
            fg: cell.fgcolor(),
            bg: cell.bgcolor(),
            bold: cell.bold(),
            italic: cell.italic(),
            underline: cell.underline(),
            inverse: cell.inverse(),
        }
    }

    fn is_plain(&self) -> bool {
        self.fg == vt100::Color::Default
            && self.bg == vt100::Color::Default
            && !self.bold
            && !self.italic
            && !self.underline
            && !self.inverse
    }

    fn css(&self) -> String {
        let (fg, bg) = if self.inverse {
            (
                css_color(self.bg).unwrap_or("#000000".to_string()),
                css_color(self.fg).or(Some("#ffffff".to_string())),
            )
        } else {
            (
                css_color(self.fg).unwrap_or_default(),
                css_color(self.bg),
            )
        };

        let mut css = String::new();
        if !fg.is_empty() {
            css.push_str(&format!("color:{fg};"));
        }
        if let Some(bg) = bg {
            css.push_str(&format!("background-color:{bg};"));
        }
        if self.bold {
            css.push_str("font-weight:bold;");
        }
        if self.italic {
            css.push_str("font-style:italic;");
        }
        if self.underline {
            css.push_str("text-decoration:underline;");
        }
        css
    }
}

fn css_color(color: vt100::Color) -> Option<String> {
    match color {
        vt100::Color::Default => None,
        vt100::Color::Idx(idx) => {
            let (r, g, b) = indexed_rgb(idx);
            Some(format!("#{r:02x}{g:02x}{b:02x}"))
        }
        vt100::Color::Rgb(r, g, b) => Some(format!("#{r:02x}{g:02x}{b:02x}")),
    }
}

/// xterm's default 256-color palette.
fn indexed_rgb(idx: u8) -> (u8, u8, u8) {
    const BASE: [(u8, u8, u8); 16] = [
        (0x00, 0x00, 0x00),
        (0xcd, 0x00, 0x00),
        (0x00, 0xcd, 0x00),
        (0xcd, 0xcd, 0x00),
        (0x00, 0x00, 0xee),
        (0xcd, 0x00, 0xcd),
        (0x00, 0xcd, 0xcd),
        (0xe5, 0xe5, 0xe5),
        (0x7f, 0x7f, 0x7f),
        (0xff, 0x00, 0x00),
        (0x00, 0xff, 0x00),
        (0xff, 0xff, 0x00),
        (0x5c, 0x5c, 0xff),
        (0xff, 0x00, 0xff),
        (0x00, 0xff, 0xff),
        (0xff, 0xff, 0xff),
    ];
    match idx {
        0..=15 => BASE[usize::from(idx)],
        16..=231 => {
            let i = idx - 16;
            let level = |v: u8| if v == 0 { 0 } else { 55 + 40 * v };
            (level(i / 36), level((i / 6) % 6), level(i % 6))
        }
        _ => {
            let gray = 8 + 10 * (idx - 232);
            (gray, gray, gray)
        }
    }
}

fn push_escaped(out: &mut String, text: &str) {
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
}

/// One screen row as HTML, one `<span>` per styled run. Trailing blank cells
/// are dropped; a row with no text comes back as whitespace only.
fn html_line(screen: &vt100::Screen, row: u16, cols: u16) -> String {
    let mut cells: Vec<(String, CellStyle)> = Vec::with_capacity(usize::from(cols));
    for col in 0..cols {
        let Some(cell) = screen.cell(row, col) else {
            continue;
        };
        if cell.is_wide_continuation() {
            continue;
        }
        let text = if cell.has_contents() {
            cell.contents()
        } else {
            " ".to_string()
        };
        cells.push((text, CellStyle::of(cell)));
    }
    while cells
        .last()
        .is_some_and(|(text, style)| text.trim().is_empty() && style.is_plain())
    {
        cells.pop();
    }

    let mut line = String::new();
    let mut i = 0;
    while i < cells.len() {
        let style = cells[i].1;
        let mut run = String::new();
        while i < cells.len() && cells[i].1 == style {
            push_escaped(&mut run, &cells[i].0);
            i += 1;
        }
        if style.is_plain() {
            line.push_str(&run);
        } else {
            line.push_str(&format!("<span style=\"{}\">{}</span>", style.css(), run));
        }
    }
    line
}
