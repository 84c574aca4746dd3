//! Message parsing: splitting raw log text into messages, templates, and
//! variables.
//!
//! The parser groups physical lines into messages: a line starting with a
//! recognised timestamp begins a new message; a line without one (in a file
//! whose earlier lines had timestamps) is a continuation and is appended
//! verbatim, embedded newline included. In a file where no line ever
//! carries a timestamp, every line is its own message.
//!
//! Encoding replaces every token (maximal run of non-whitespace bytes) with
//! a placeholder byte and one 64-bit variable; the remaining whitespace
//! skeleton, placeholder bytes included, is the message's log-type
//! template. Decoding walks the template back, substituting decoded
//! variable spellings.

use std::io::BufRead;

use crate::dict::{DictionaryId, DictionaryReader, DictionaryWriter, LogTypeEntry};
use crate::encode::{classify_token, decode_var, PlaceholderKind, TokenClass};
use crate::error::{LogPackError, Result};
use crate::time::{search_known_patterns, EpochTimeMs, TimestampPattern};

/// One parsed message: its raw text (timestamp still embedded) and what was
/// learned about its timestamp.
#[derive(Debug, Clone)]
pub struct Message {
    /// Parsed timestamp, if the leading line carried one.
    pub timestamp: Option<EpochTimeMs>,
    /// Pattern that matched the timestamp.
    pub pattern: Option<&'static TimestampPattern>,
    /// Byte range of the timestamp within `text`.
    pub ts_begin: usize,
    /// End of the timestamp byte range.
    pub ts_end: usize,
    /// Raw message text, trailing newline and continuation lines included.
    pub text: String,
}

impl Message {
    /// The message text with the timestamp bytes removed; this is what gets
    /// encoded.
    pub fn content_without_timestamp(&self) -> String {
        if self.timestamp.is_none() {
            return self.text.clone();
        }
        let mut content = String::with_capacity(self.text.len());
        content.push_str(&self.text[..self.ts_begin]);
        content.push_str(&self.text[self.ts_end..]);
        content
    }

    /// Size of the raw message in bytes.
    pub fn num_bytes(&self) -> u64 {
        self.text.len() as u64
    }
}

/// Stateful line-to-message grouper for one input file.
#[derive(Default)]
pub struct MessageParser {
    current_pattern: Option<&'static TimestampPattern>,
    pending: Option<Message>,
}

impl MessageParser {
    /// Creates a parser with no timestamp pattern seen yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads lines from `reader` until a complete message is available.
    ///
    /// Returns `None` at end of input once all buffered text has been
    /// emitted. Input must be UTF-8.
    pub fn parse_next<R: BufRead>(&mut self, reader: &mut R) -> Result<Option<Message>> {
        loop {
            let mut line = String::new();
            if reader.read_line(&mut line)? == 0 {
                return Ok(self.pending.take());
            }

            // The file's current pattern is retried before the full table;
            // most files keep one shape throughout.
            let matched = self
                .current_pattern
                .and_then(|p| {
                    p.parse_timestamp(&line)
                        .map(|(ts, begin, end)| (p, ts, begin, end))
                })
                .or_else(|| search_known_patterns(&line));

            match matched {
                Some((pattern, timestamp, ts_begin, ts_end)) => {
                    self.current_pattern = Some(pattern);
                    let message = Message {
                        timestamp: Some(timestamp),
                        pattern: Some(pattern),
                        ts_begin,
                        ts_end,
                        text: line,
                    };
                    if let Some(complete) = self.pending.replace(message) {
                        return Ok(Some(complete));
                    }
                }
                None => {
                    if let Some(pending) = self.pending.as_mut() {
                        pending.text.push_str(&line);
                    } else {
                        // No preceding timestamped line: the line stands
                        // alone.
                        return Ok(Some(Message {
                            timestamp: None,
                            pattern: None,
                            ts_begin: 0,
                            ts_end: 0,
                            text: line,
                        }));
                    }
                }
            }
        }
    }
}

/// One encoded variable slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodedVar {
    /// Inline signed integer.
    Int(i64),
    /// Inline packed float.
    Float(u64),
    /// Variable-dictionary ID.
    Dict(DictionaryId),
}

impl EncodedVar {
    /// The raw 64-bit slot written to the variable stream.
    pub fn slot(self) -> u64 {
        match self {
            EncodedVar::Int(v) => v as u64,
            EncodedVar::Float(p) => p,
            EncodedVar::Dict(id) => id,
        }
    }

    /// The placeholder kind this slot is stored under.
    pub fn kind(self) -> PlaceholderKind {
        match self {
            EncodedVar::Int(_) => PlaceholderKind::Int,
            EncodedVar::Float(_) => PlaceholderKind::Float,
            EncodedVar::Dict(_) => PlaceholderKind::Dict,
        }
    }
}

/// Splits message content (timestamp already removed) into its log-type
/// template and encoded variables, inserting dictionary variables into
/// `var_dict`.
pub fn encode_message(
    content: &str,
    var_dict: &mut DictionaryWriter,
) -> Result<(String, Vec<EncodedVar>)> {
    let bytes = content.as_bytes();
    let mut template = String::with_capacity(content.len());
    let mut vars = Vec::new();

    let mut ix = 0;
    while ix < bytes.len() {
        if bytes[ix].is_ascii_whitespace() {
            template.push(bytes[ix] as char);
            ix += 1;
            continue;
        }
        let start = ix;
        while ix < bytes.len() && !bytes[ix].is_ascii_whitespace() {
            ix += 1;
        }
        let token = &content[start..ix];
        let var = match classify_token(token) {
            TokenClass::Int(value) => EncodedVar::Int(value),
            TokenClass::Float(packed) => EncodedVar::Float(packed),
            TokenClass::Dict => {
                let (id, _) = var_dict.add_or_get(token)?;
                EncodedVar::Dict(id)
            }
        };
        template.push(var.kind().as_byte() as char);
        vars.push(var);
    }
    Ok((template, vars))
}

/// Rebuilds message content (without timestamp) from a log-type entry and
/// its variable slots.
pub fn decode_message(
    entry: &LogTypeEntry,
    vars: &[u64],
    var_dict: &DictionaryReader,
) -> Result<String> {
    if vars.len() != entry.num_vars() {
        return Err(LogPackError::corrupt(format!(
            "message carries {} variables but log-type declares {}",
            vars.len(),
            entry.num_vars()
        )));
    }

    let mut content = String::with_capacity(entry.template().len() + vars.len() * 8);
    let mut var_ix = 0;
    for c in entry.template().chars() {
        match PlaceholderKind::from_byte_char(c) {
            Some(kind) => {
                let token = decode_var(kind, vars[var_ix], |id| {
                    var_dict.get(id).map(str::to_string)
                })?;
                content.push_str(&token);
                var_ix += 1;
            }
            None => content.push(c),
        }
    }
    Ok(content)
}

impl PlaceholderKind {
    /// Maps a template character to its placeholder kind, if any.
    fn from_byte_char(c: char) -> Option<Self> {
        u8::try_from(c).ok().and_then(PlaceholderKind::from_byte)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Codec;
    use crate::encode::{PLACEHOLDER_DICT, PLACEHOLDER_INT};
    use std::io::Cursor;
    use tempfile::TempDir;

    fn parse_all(input: &str) -> Vec<Message> {
        let mut parser = MessageParser::new();
        let mut reader = Cursor::new(input.as_bytes());
        let mut messages = Vec::new();
        while let Some(message) = parser.parse_next(&mut reader).unwrap() {
            messages.push(message);
        }
        messages
    }

    #[test]
    fn test_single_message_with_timestamp() {
        let messages = parse_all("2015-02-01T01:02:03.004 hello world 42\n");
        assert_eq!(messages.len(), 1);
        let msg = &messages[0];
        assert_eq!(msg.timestamp, Some(1_422_752_523_004));
        assert_eq!((msg.ts_begin, msg.ts_end), (0, 23));
        assert_eq!(msg.pattern.unwrap().format(), "%Y-%m-%dT%H:%M:%S.%3");
        assert_eq!(msg.content_without_timestamp(), " hello world 42\n");
    }

    #[test]
    fn test_continuation_line_joins_previous_message() {
        let messages = parse_all(
            "2015-02-01T01:02:03.004 hello world 42\n    continuation\n",
        );
        assert_eq!(messages.len(), 1);
        assert_eq!(
            messages[0].text,
            "2015-02-01T01:02:03.004 hello world 42\n    continuation\n"
        );
    }

    #[test]
    fn test_two_messages_split_on_second_timestamp() {
        let messages = parse_all(
            "2015-02-01T01:02:03.004 first\n2015-02-01T01:02:04.000 second\n",
        );
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].text, "2015-02-01T01:02:03.004 first\n");
        assert_eq!(messages[1].text, "2015-02-01T01:02:04.000 second\n");
    }

    #[test]
    fn test_timestampless_file_emits_one_message_per_line() {
        let messages = parse_all("alpha\nbeta\ngamma\n");
        assert_eq!(messages.len(), 3);
        for message in &messages {
            assert!(message.timestamp.is_none());
        }
    }

    #[test]
    fn test_leading_untimestamped_lines_stand_alone() {
        let messages = parse_all("preamble\n2015-02-01 01:02:03 body\ntail\n");
        assert_eq!(messages.len(), 2);
        assert!(messages[0].timestamp.is_none());
        assert_eq!(messages[0].text, "preamble\n");
        // "tail" joins the timestamped message.
        assert_eq!(messages[1].text, "2015-02-01 01:02:03 body\ntail\n");
    }

    #[test]
    fn test_final_line_without_newline() {
        let messages = parse_all("2015-02-01 01:02:03 no newline at end");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].text, "2015-02-01 01:02:03 no newline at end");
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let dir = TempDir::new().unwrap();
        let dict_path = dir.path().join("var.dict");
        let mut var_dict = DictionaryWriter::open(&dict_path, Codec::Zstd(3)).unwrap();

        let content = " hello world 42 -00.120\n    continuation\n";
        let (template, vars) = encode_message(content, &mut var_dict).unwrap();
        var_dict.close().unwrap();

        let expected_template = format!(
            " {d} {d} {i} {f}\n    {d}\n",
            d = PLACEHOLDER_DICT as char,
            i = PLACEHOLDER_INT as char,
            f = crate::encode::PLACEHOLDER_FLOAT as char,
        );
        assert_eq!(template, expected_template);
        assert_eq!(vars.len(), 5);
        assert_eq!(vars[2], EncodedVar::Int(42));
        assert!(matches!(vars[3], EncodedVar::Float(_)));

        let var_reader = DictionaryReader::open(&dict_path, Codec::Zstd(3)).unwrap();
        let entry = LogTypeEntry::from_template(template);
        let slots: Vec<u64> = vars.iter().map(|v| v.slot()).collect();
        let decoded = decode_message(&entry, &slots, &var_reader).unwrap();
        assert_eq!(decoded, content);
    }

    #[test]
    fn test_decode_var_count_mismatch_is_corruption() {
        let dir = TempDir::new().unwrap();
        let dict_path = dir.path().join("var.dict");
        let mut var_dict = DictionaryWriter::open(&dict_path, Codec::Zstd(3)).unwrap();
        let (template, vars) = encode_message("one two\n", &mut var_dict).unwrap();
        var_dict.close().unwrap();

        let var_reader = DictionaryReader::open(&dict_path, Codec::Zstd(3)).unwrap();
        let entry = LogTypeEntry::from_template(template);
        let slots: Vec<u64> = vars.iter().map(|v| v.slot()).take(1).collect();
        assert!(decode_message(&entry, &slots, &var_reader).is_err());
    }

    #[test]
    fn test_identical_templates_share_shape() {
        let dir = TempDir::new().unwrap();
        let dict_path = dir.path().join("var.dict");
        let mut var_dict = DictionaryWriter::open(&dict_path, Codec::Zstd(3)).unwrap();

        let (t1, _) = encode_message(" connected to 10.0.0.1\n", &mut var_dict).unwrap();
        let (t2, _) = encode_message(" connected to 10.0.0.2\n", &mut var_dict).unwrap();
        var_dict.close().unwrap();
        assert_eq!(t1, t2);
    }
}
