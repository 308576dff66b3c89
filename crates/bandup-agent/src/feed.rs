//! JSON-lines host event feed.
//!
//! One event per line, tagged by `event`:
//!
//! ```text
//! {"event":"connect","group":"G1","iface":"wlan0","peer":"aa:bb:cc:dd:ee:01"}
//! {"event":"high_traffic","group":"G1"}
//! ```
//!
//! Blank lines and lines starting with `#` are skipped. A line that fails to
//! parse is logged and skipped.

use std::io::BufRead;

use bandup_core::{Event, EventSender};

/// Parse one feed line. `None` for blank and comment lines.
pub fn parse_line(line: &str) -> Option<serde_json::Result<Event>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    Some(serde_json::from_str(line))
}

/// Queue every event read from `reader` until EOF. Returns the number of
/// events queued.
pub fn run(reader: impl BufRead, sender: &EventSender) -> anyhow::Result<usize> {
    let mut queued = 0;
    for (lineno, line) in reader.lines().enumerate() {
        let line = line?;
        match parse_line(&line) {
            None => {}
            Some(Ok(event)) => {
                tracing::debug!(line = lineno + 1, event = event.kind(), "event received");
                sender.send(event)?;
                queued += 1;
            }
            Some(Err(e)) => {
                tracing::warn!(line = lineno + 1, error = %e, "ignoring malformed event");
            }
        }
    }
    Ok(queued)
}
