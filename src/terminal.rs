use crate::input::SurfaceBounds;
use anyhow::Context;
use crossterm::{
    cursor, event,
    terminal::{self, ClearType},
    ExecutableCommand,
};
use std::io::{stdout, Stdout, Write};

// Smallest stage the host will drive: one HUD line plus a visible strip of
// surface on top of it.
const MIN_COLS: u16 = 4;
const MIN_ROWS: u16 = 3;

/// The host's terminal session. Owns raw mode, the alternate screen, and
/// mouse capture for the process lifetime, and is the single place that
/// turns terminal cells into pointer bounds and stage viewports.
pub struct TerminalHost {
    cols: u16,
    rows: u16,
}

impl TerminalHost {
    pub fn open() -> anyhow::Result<Self> {
        let (cols, rows) = terminal::size().context("measure terminal")?;
        if cols < MIN_COLS || rows < MIN_ROWS {
            anyhow::bail!(
                "terminal too small for the stage ({cols}x{rows}, need {MIN_COLS}x{MIN_ROWS})"
            );
        }

        terminal::enable_raw_mode().context("enter raw mode")?;
        // From this point Drop restores the terminal, even if a later setup
        // step below fails.
        let host = Self { cols, rows };

        let mut out = stdout();
        out.execute(terminal::EnterAlternateScreen)
            .context("enter alternate screen")?;
        out.execute(terminal::Clear(ClearType::All))
            .context("clear screen")?;
        out.execute(cursor::Hide).context("hide cursor")?;
        out.execute(event::EnableMouseCapture)
            .context("capture mouse for pointer routes")?;

        Ok(host)
    }

    pub fn size(&self) -> (u16, u16) {
        (self.cols, self.rows)
    }

    pub fn note_resize(&mut self, cols: u16, rows: u16) {
        self.cols = cols;
        self.rows = rows;
    }

    /// Pointer-normalization bounds for the current size, with `hud_rows`
    /// reserved at the bottom and excluded from input capture.
    pub fn bounds(&self, hud_rows: u16) -> SurfaceBounds {
        SurfaceBounds::new(self.cols, self.rows, hud_rows)
    }

    /// Pixel viewport handed to the surface stage. The terminal host maps
    /// one cell to one pixel; the stage applies the device-pixel ratio.
    pub fn viewport(&self, hud_rows: u16) -> (u32, u32) {
        let bounds = self.bounds(hud_rows);
        (bounds.cols as u32, bounds.visual_rows() as u32)
    }

    pub fn writer() -> Stdout {
        stdout()
    }
}

impl Drop for TerminalHost {
    fn drop(&mut self) {
        let mut out = stdout();
        let _ = out.execute(event::DisableMouseCapture);
        let _ = terminal::disable_raw_mode();
        let _ = out.write_all(b"\x1b[0m");
        let _ = out.flush();
        let _ = out.execute(cursor::Show);
        let _ = out.execute(terminal::LeaveAlternateScreen);
    }
}
