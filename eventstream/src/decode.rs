//! Incremental decoder for the `text/event-stream` wire format.

use core::time::Duration;

use crate::EventRecord;

/// Feeds on raw response chunks and yields complete event records.
/// Chunk boundaries may fall anywhere, including inside a UTF-8 sequence;
/// only complete lines are ever interpreted.
#[derive(Default)]
pub struct Decoder {
    buffer: Vec<u8>,
    data: String,
    event: Option<String>,
    id: Option<String>,
    retry: Option<Duration>,
}

impl Decoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<EventRecord> {
        self.buffer.extend_from_slice(chunk);

        let mut records = vec![];

        while let Some(newline) = self.buffer.iter().position(|byte| *byte == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=newline).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\n', '\r']);

            if let Some(record) = self.process_line(line) {
                records.push(record);
            }
        }

        records
    }

    fn process_line(&mut self, line: &str) -> Option<EventRecord> {
        if line.is_empty() {
            return self.dispatch();
        }

        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "data" => {
                self.data.push_str(value);
                self.data.push('\n');
            }
            "event" => self.event = Some(value.to_owned()),
            "id" => self.id = Some(value.to_owned()),
            "retry" => {
                if let Ok(milliseconds) = value.parse() {
                    self.retry = Some(Duration::from_millis(milliseconds));
                }
            }
            _ => {}
        }

        None
    }

    fn dispatch(&mut self) -> Option<EventRecord> {
        let data = core::mem::take(&mut self.data);
        let event = self.event.take();
        let id = self.id.take();
        let retry = self.retry.take();

        // A block must carry data or advance the event id to be dispatched.
        if data.is_empty() && id.is_none() {
            return None;
        }

        Some(EventRecord {
            id,
            event,
            data: data.strip_suffix('\n').unwrap_or(&data).to_owned(),
            retry,
        })
    }
}
