//! Incremental `<sg-file>` parser for streamed replies.
//!
//! Advisory only: it produces preview events and never touches disk.
//! Malformed input is skipped silently and the parser resyncs on the
//! next opening tag.

use tracing::debug;

use super::{find_open_tag, find_tag_end, parse_attributes, FileAction, CLOSE_TAG, OPEN_TAG_PREFIX};

/// Bytes held back while inside a body, so a closing tag split across
/// chunks is never emitted as content.
pub const SPLIT_TAG_GUARD: usize = 20;

/// An opening tag longer than this without its `>` is treated as garbage.
const MAX_OPEN_TAG_LEN: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileStreamEvent {
    Start {
        path: String,
        action: FileAction,
        summary: Option<String>,
    },
    Content {
        path: String,
        content: String,
        is_incremental: bool,
    },
    End {
        path: String,
        action: FileAction,
        full_content: String,
    },
}

#[derive(Debug)]
struct OpenRecord {
    path: String,
    action: FileAction,
    content: String,
}

#[derive(Debug, Default)]
enum State {
    #[default]
    Outside,
    Inside(OpenRecord),
}

#[derive(Debug, Default)]
pub struct StreamingFileParser {
    state: State,
    buffer: String,
}

impl StreamingFileParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a record is currently open.
    pub fn is_inside(&self) -> bool {
        matches!(self.state, State::Inside(_))
    }

    /// Feed one chunk and collect the events it completes.
    pub fn push(&mut self, chunk: &str) -> Vec<FileStreamEvent> {
        self.buffer.push_str(chunk);
        let mut events = Vec::new();

        loop {
            match std::mem::take(&mut self.state) {
                State::Outside => {
                    if !self.scan_outside(&mut events) {
                        break;
                    }
                }
                State::Inside(mut record) => {
                    if let Some(close) = self.buffer.find(CLOSE_TAG) {
                        let content: String = self.buffer.drain(..close).collect();
                        self.buffer.drain(..CLOSE_TAG.len());
                        if !content.is_empty() {
                            record.content.push_str(&content);
                            events.push(FileStreamEvent::Content {
                                path: record.path.clone(),
                                content,
                                is_incremental: true,
                            });
                        }
                        events.push(FileStreamEvent::End {
                            path: record.path,
                            action: record.action,
                            full_content: record.content,
                        });
                        continue;
                    }

                    if self.buffer.len() > SPLIT_TAG_GUARD {
                        let mut split = self.buffer.len() - SPLIT_TAG_GUARD;
                        while !self.buffer.is_char_boundary(split) {
                            split -= 1;
                        }
                        if split > 0 {
                            let content: String = self.buffer.drain(..split).collect();
                            record.content.push_str(&content);
                            events.push(FileStreamEvent::Content {
                                path: record.path.clone(),
                                content,
                                is_incremental: true,
                            });
                        }
                    }
                    self.state = State::Inside(record);
                    break;
                }
            }
        }

        events
    }

    /// Flush at end of stream. An unterminated record is closed with what it has.
    pub fn finish(&mut self) -> Vec<FileStreamEvent> {
        let mut events = Vec::new();
        if let State::Inside(mut record) = std::mem::take(&mut self.state) {
            let rest = std::mem::take(&mut self.buffer);
            if !rest.is_empty() {
                record.content.push_str(&rest);
                events.push(FileStreamEvent::Content {
                    path: record.path.clone(),
                    content: rest,
                    is_incremental: true,
                });
            }
            debug!("Stream ended inside record {}", record.path);
            events.push(FileStreamEvent::End {
                path: record.path,
                action: record.action,
                full_content: record.content,
            });
        }
        self.buffer.clear();
        events
    }

    /// Look for the next opening tag. Returns `true` if the state changed and
    /// scanning should continue.
    fn scan_outside(&mut self, events: &mut Vec<FileStreamEvent>) -> bool {
        let Some(start) = find_open_tag(&self.buffer) else {
            self.retain_partial_open_tag();
            return false;
        };

        let Some(end) = find_tag_end(&self.buffer[start..]) else {
            self.buffer.drain(..start);
            if self.buffer.len() > MAX_OPEN_TAG_LEN {
                debug!("Discarding oversized opening tag");
                self.buffer.drain(..OPEN_TAG_PREFIX.len());
                return true;
            }
            return false;
        };

        let inner = &self.buffer[start + OPEN_TAG_PREFIX.len()..start + end];
        match parse_attributes(inner) {
            Ok(attrs) => {
                events.push(FileStreamEvent::Start {
                    path: attrs.path.clone(),
                    action: attrs.action,
                    summary: attrs.summary,
                });
                self.state = State::Inside(OpenRecord {
                    path: attrs.path,
                    action: attrs.action,
                    content: String::new(),
                });
            }
            Err(reason) => debug!("Skipping malformed opening tag: {}", reason),
        }
        self.buffer.drain(..start + end + 1);
        true
    }

    /// Keep only a tail that could still grow into `<sg-file`.
    fn retain_partial_open_tag(&mut self) {
        let keep_from = self
            .buffer
            .rfind('<')
            .filter(|&idx| OPEN_TAG_PREFIX.starts_with(&self.buffer[idx..]));
        match keep_from {
            Some(idx) => {
                self.buffer.drain(..idx);
            }
            None => self.buffer.clear(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(chunks: &[&str]) -> Vec<FileStreamEvent> {
        let mut parser = StreamingFileParser::new();
        let mut events = Vec::new();
        for chunk in chunks {
            events.extend(parser.push(chunk));
        }
        events.extend(parser.finish());
        events
    }

    /// (path, concatenated incremental content, full_content) per record.
    fn records(events: &[FileStreamEvent]) -> Vec<(String, String, String)> {
        let mut out = Vec::new();
        let mut current: Option<(String, String)> = None;
        for event in events {
            match event {
                FileStreamEvent::Start { path, .. } => {
                    assert!(current.is_none(), "nested start for {path}");
                    current = Some((path.clone(), String::new()));
                }
                FileStreamEvent::Content { path, content, .. } => {
                    let (open, acc) = current.as_mut().expect("content outside record");
                    assert_eq!(open, path);
                    acc.push_str(content);
                }
                FileStreamEvent::End {
                    path, full_content, ..
                } => {
                    let (open, acc) = current.take().expect("end without start");
                    assert_eq!(&open, path);
                    out.push((open, acc, full_content.clone()));
                }
            }
        }
        assert!(current.is_none(), "unpaired start");
        out
    }

    #[test]
    fn test_single_chunk_record() {
        let events = run(&["Sure!\n<sg-file path=\"src/a.ts\" summary=\"add a\">\nconst a = 1;\n</sg-file>\nDone."]);
        assert_eq!(
            events[0],
            FileStreamEvent::Start {
                path: "src/a.ts".to_string(),
                action: FileAction::Write,
                summary: Some("add a".to_string()),
            }
        );
        let recs = records(&events);
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].1, "\nconst a = 1;\n");
        assert_eq!(recs[0].2, "\nconst a = 1;\n");
    }

    #[test]
    fn test_every_chunking_yields_same_records() {
        let reply = "Intro <b>bold</b>\n<sg-file path=\"a.ts\">\nif (x < 1) { return \"é\"; }\n</sg-file>\nbetween\n<sg-file action=\"delete\" path=\"old.ts\"></sg-file>\n<sg-file path=\"b/ü.md\">\n# Título\n</sg-file>";
        let chars: Vec<char> = reply.chars().collect();
        let expected = records(&run(&[reply]));
        assert_eq!(expected.len(), 3);

        for size in 1..=chars.len() {
            let chunks: Vec<String> = chars.chunks(size).map(|c| c.iter().collect()).collect();
            let refs: Vec<&str> = chunks.iter().map(String::as_str).collect();
            assert_eq!(records(&run(&refs)), expected, "chunk size {size}");
        }
    }

    #[test]
    fn test_content_held_back_near_split_close_tag() {
        let mut parser = StreamingFileParser::new();
        parser.push("<sg-file path=\"a\">");
        let events = parser.push("0123456789012345678901234567890</sg-f");
        for event in &events {
            if let FileStreamEvent::Content { content, .. } = event {
                assert!(!content.contains('<'));
            }
        }
        let events = parser.push("ile>");
        assert!(matches!(events.last(), Some(FileStreamEvent::End { .. })));
        assert!(!parser.is_inside());
    }

    #[test]
    fn test_unterminated_record_closed_at_finish() {
        let recs = records(&run(&["<sg-file path=\"a.ts\">partial bo", "dy"]));
        assert_eq!(
            recs,
            vec![(
                "a.ts".to_string(),
                "partial body".to_string(),
                "partial body".to_string()
            )]
        );
    }

    #[test]
    fn test_malformed_tag_resyncs() {
        let recs = records(&run(&[
            "<sg-file summary=\"no path\">ignored</sg-file>",
            "<sg-file path=\"ok.ts\">fine</sg-file>",
        ]));
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].0, "ok.ts");
        assert_eq!(recs[0].2, "fine");
    }

    #[test]
    fn test_prose_only_emits_nothing() {
        assert!(run(&["just some ", "text with < and > signs"]).is_empty());
    }
}
