use crate::runtime::OutputFrame;

/// Accumulates the stdout and stderr frames of one exec
///
/// Each stream keeps at most `limit` bytes. Frames past the limit are
/// dropped but still count as seen, so draining continues and stream-based
/// classification is unaffected by the cap.
#[derive(Debug, Default)]
pub(crate) struct StreamCapture {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    limit: Option<usize>,
    truncated: bool,
}

impl StreamCapture {
    pub(crate) fn new(limit: Option<usize>) -> Self {
        Self {
            limit,
            ..Default::default()
        }
    }

    pub(crate) fn push(&mut self, frame: OutputFrame) {
        let (buf, bytes) = match frame {
            OutputFrame::Stdout(bytes) => (&mut self.stdout, bytes),
            OutputFrame::Stderr(bytes) => (&mut self.stderr, bytes),
        };

        let room = match self.limit {
            Some(limit) => limit.saturating_sub(buf.len()),
            None => usize::MAX,
        };
        if bytes.len() > room {
            self.truncated = true;
        }
        buf.extend_from_slice(&bytes[..bytes.len().min(room)]);
    }

    pub(crate) fn stderr(&self) -> &[u8] {
        &self.stderr
    }

    /// Whether any stream hit the cap
    pub(crate) fn is_truncated(&self) -> bool {
        self.truncated
    }

    /// Decode both streams, replacing invalid UTF-8
    pub(crate) fn into_strings(self) -> (String, String) {
        (
            String::from_utf8_lossy(&self.stdout).into_owned(),
            String::from_utf8_lossy(&self.stderr).into_owned(),
        )
    }
}
