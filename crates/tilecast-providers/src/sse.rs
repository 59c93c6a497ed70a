/// Splits a provider's raw event-stream bytes into `data:` payloads.
///
/// Bytes are buffered until a full frame (terminated by a blank line) is
/// available, so multi-byte characters split across network chunks decode
/// correctly.
#[derive(Default)]
pub(crate) struct SseFrameBuffer {
    buffer: Vec<u8>,
}

impl SseFrameBuffer {
    pub(crate) fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend(bytes.iter().copied().filter(|b| *b != b'\r'));
        let mut payloads = Vec::new();
        while let Some(pos) = find_frame_end(&self.buffer) {
            let frame = self.buffer.drain(..pos + 2).collect::<Vec<_>>();
            if let Some(payload) = frame_payload(&frame[..pos]) {
                payloads.push(payload);
            }
        }
        payloads
    }

    /// Payload of an unterminated trailing frame, if any.
    pub(crate) fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        frame_payload(&rest)
    }
}

fn find_frame_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(2).position(|w| w == b"\n\n")
}

fn frame_payload(frame: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(frame);
    let data = text
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|rest| rest.strip_prefix(' ').unwrap_or(rest))
        .collect::<Vec<_>>();
    if data.is_empty() {
        return None;
    }
    Some(data.join("\n"))
}
