//! Incremental decoding of a streamed top-level JSON array
//!
//! Some backends answer a streaming request with a single JSON array whose
//! elements are written to the connection as they are generated:
//!
//! ```text
//! [{"candidates": ...}
//! ,
//! {"candidates": ...}
//! ]
//! ```
//!
//! [`ArrayStream`] hands out those elements one at a time while the rest of
//! the array is still in flight. Array delimiters are found by peeking the
//! buffered reader; each element is decoded by `serde_json` straight from the
//! current read position, so read boundaries may fall anywhere.

use std::io::{self, BufRead, BufReader, Read};
use std::marker::PhantomData;

use serde::de::DeserializeOwned;

use crate::error::{LlmError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Opening `[` not consumed yet
    Initial,
    /// Inside the array
    Reading,
    /// Closing `]` consumed, input exhausted, or an error was returned
    Finished,
}

/// Pull decoder over a JSON array arriving on a byte stream
pub struct ArrayStream<R, T> {
    reader: R,
    state: State,
    /// At least one element has been decoded, so a `,` must precede the next
    seen_element: bool,
    /// Byte consumed from `reader` as number lookahead but not yet examined
    pending: Option<u8>,
    _element: PhantomData<fn() -> T>,
}

impl<R: Read, T: DeserializeOwned> ArrayStream<BufReader<R>, T> {
    /// Wrap an unbuffered source such as an HTTP response body
    pub fn from_reader(reader: R) -> Self {
        Self::new(BufReader::new(reader))
    }
}

impl<R: BufRead, T: DeserializeOwned> ArrayStream<R, T> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            state: State::Initial,
            seen_element: false,
            pending: None,
            _element: PhantomData,
        }
    }

    /// Decode the next array element.
    ///
    /// Returns `Ok(None)` once the array has closed (or the input was empty),
    /// and keeps returning it on every later call.
    pub fn next_element(&mut self) -> Result<Option<T>> {
        let result = self.advance();
        if result.is_err() {
            self.state = State::Finished;
        }
        result
    }

    fn advance(&mut self) -> Result<Option<T>> {
        if self.state == State::Initial {
            match self.peek_token()? {
                None => {
                    self.state = State::Finished;
                    return Ok(None);
                }
                Some(b'[') => {
                    self.bump();
                    self.state = State::Reading;
                }
                Some(other) => {
                    return Err(LlmError::StreamFormat(format!(
                        "expected '[', got {}",
                        describe(other)
                    )));
                }
            }
        }

        if self.state == State::Reading {
            if self.more()? {
                return self.decode().map(Some);
            }
            self.state = State::Finished;
        }

        Ok(None)
    }

    /// Position the reader at the start of the next element, or consume the
    /// closing `]` and return false.
    fn more(&mut self) -> Result<bool> {
        let mut token = self.peek_token()?;
        let mut separated = false;
        if self.seen_element && token == Some(b',') {
            self.bump();
            separated = true;
            token = self.peek_token()?;
        }

        match token {
            None => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "stream ended inside JSON array",
            )
            .into()),
            Some(b']') if separated => Err(LlmError::StreamFormat(
                "trailing ',' before ']'".to_string(),
            )),
            Some(b']') => {
                self.bump();
                Ok(false)
            }
            Some(other) if self.seen_element && !separated => Err(LlmError::StreamFormat(
                format!("expected ',' or ']', got {}", describe(other)),
            )),
            Some(_) => Ok(true),
        }
    }

    fn decode(&mut self) -> Result<T> {
        debug_assert!(self.pending.is_none());

        let numeric = matches!(self.peek_token()?, Some(b'-' | b'0'..=b'9'));
        let mut source = Tracking {
            inner: &mut self.reader,
            last: None,
        };
        let mut de = serde_json::Deserializer::from_reader(&mut source);
        let value = T::deserialize(&mut de)?;
        drop(de);

        // A number only ends once a non-digit is seen, and serde_json keeps
        // that byte in the deserializer we just dropped.
        if numeric {
            self.pending = source.last.filter(|b| !b.is_ascii_digit());
        }
        self.seen_element = true;
        Ok(value)
    }

    /// Skip whitespace and return the next byte without consuming it.
    /// `None` means the source is exhausted.
    fn peek_token(&mut self) -> io::Result<Option<u8>> {
        if let Some(b) = self.pending {
            if !is_whitespace(b) {
                return Ok(Some(b));
            }
            self.pending = None;
        }

        loop {
            let buf = match self.reader.fill_buf() {
                Ok(buf) => buf,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            if buf.is_empty() {
                return Ok(None);
            }
            match buf.iter().position(|&b| !is_whitespace(b)) {
                Some(i) => {
                    let b = buf[i];
                    self.reader.consume(i);
                    return Ok(Some(b));
                }
                None => {
                    let len = buf.len();
                    self.reader.consume(len);
                }
            }
        }
    }

    /// Consume the byte last returned by `peek_token`.
    fn bump(&mut self) {
        if self.pending.take().is_none() {
            self.reader.consume(1);
        }
    }
}

impl<R: BufRead, T: DeserializeOwned> Iterator for ArrayStream<R, T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_element().transpose()
    }
}

/// Remembers the last byte handed to the JSON deserializer.
struct Tracking<'a, R> {
    inner: &'a mut R,
    last: Option<u8>,
}

impl<R: Read> Read for Tracking<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n > 0 {
            self.last = Some(buf[n - 1]);
        }
        Ok(n)
    }
}

fn is_whitespace(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\n' | b'\r')
}

fn describe(b: u8) -> String {
    if b.is_ascii_graphic() {
        format!("'{}'", b as char)
    } else {
        format!("byte 0x{:02x}", b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde::Deserialize;
    use serde_json::{Value, json};

    /// Serves `data` in the given chunk sizes, cycling through them.
    struct Chunked<'a> {
        data: &'a [u8],
        sizes: Vec<usize>,
        turn: usize,
    }

    impl<'a> Chunked<'a> {
        fn new(data: &'a [u8], sizes: Vec<usize>) -> Self {
            Self {
                data,
                sizes,
                turn: 0,
            }
        }
    }

    impl Read for Chunked<'_> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let size = self.sizes[self.turn % self.sizes.len()].max(1);
            self.turn += 1;
            let n = size.min(buf.len()).min(self.data.len());
            buf[..n].copy_from_slice(&self.data[..n]);
            self.data = &self.data[n..];
            Ok(n)
        }
    }

    /// Fails every read once `data` is used up.
    struct Broken<'a> {
        data: &'a [u8],
    }

    impl Read for Broken<'_> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.data.is_empty() {
                return Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset"));
            }
            let n = buf.len().min(self.data.len());
            buf[..n].copy_from_slice(&self.data[..n]);
            self.data = &self.data[n..];
            Ok(n)
        }
    }

    fn values(input: &str) -> ArrayStream<&[u8], Value> {
        ArrayStream::new(input.as_bytes())
    }

    fn collect_chunked(input: &[u8], sizes: Vec<usize>) -> Vec<Value> {
        let reader = BufReader::with_capacity(64, Chunked::new(input, sizes));
        ArrayStream::new(reader)
            .collect::<Result<Vec<Value>>>()
            .unwrap()
    }

    #[derive(Debug, Deserialize)]
    struct Chunk {
        candidates: Vec<Candidate>,
    }

    #[derive(Debug, Deserialize)]
    struct Candidate {
        content: Content,
    }

    #[derive(Debug, Deserialize)]
    struct Content {
        parts: Vec<Part>,
    }

    #[derive(Debug, Deserialize)]
    struct Part {
        text: String,
    }

    const GEMINI_STREAM: &str = r#"[{
    "candidates": [
      {
        "content": {
          "parts": [
            {
              "text": "That"
            }
          ],
          "role": "model"
        }
      }
    ]
  }
  ,
  {
    "candidates": [
      {
        "content": {
          "parts": [
            {
              "text": "'s a fun question, and the answer is totally subjective! There's"
            }
          ],
          "role": "model"
        }
      }
    ]
  }
  ]
  "#;

    fn first_text(chunk: &Chunk) -> &str {
        &chunk.candidates[0].content.parts[0].text
    }

    #[test]
    fn test_gemini_stream() {
        let mut stream: ArrayStream<_, Chunk> = ArrayStream::new(GEMINI_STREAM.as_bytes());

        let chunk = stream.next_element().unwrap().unwrap();
        assert_eq!(first_text(&chunk), "That");

        let chunk = stream.next_element().unwrap().unwrap();
        assert_eq!(
            first_text(&chunk),
            "'s a fun question, and the answer is totally subjective! There's"
        );

        assert!(stream.next_element().unwrap().is_none());
    }

    #[test]
    fn test_gemini_stream_one_byte_reads() {
        let reader = BufReader::with_capacity(1, Chunked::new(GEMINI_STREAM.as_bytes(), vec![1]));
        let texts: Vec<String> = ArrayStream::<_, Chunk>::new(reader)
            .map(|chunk| first_text(&chunk.unwrap()).to_string())
            .collect();
        assert_eq!(texts.len(), 2);
        assert_eq!(texts[0], "That");
        assert!(texts[1].starts_with("'s a fun question"));
    }

    #[test]
    fn test_empty_array() {
        let mut stream = values("[]");
        for _ in 0..5 {
            assert!(stream.next_element().unwrap().is_none());
        }
    }

    #[test]
    fn test_empty_input() {
        let mut stream = values("  \n ");
        assert!(stream.next_element().unwrap().is_none());
        assert!(stream.next_element().unwrap().is_none());
    }

    #[test]
    fn test_end_of_stream_repeats() {
        let mut stream = values(r#"[{"a": 1}]"#);
        assert_eq!(stream.next_element().unwrap(), Some(json!({"a": 1})));
        for _ in 0..10 {
            assert!(stream.next_element().unwrap().is_none());
        }
    }

    #[test]
    fn test_rejects_non_array_prefix() {
        for input in [r#"{}"#, r#""x""#, "1", "]"] {
            let err = values(input).next_element().unwrap_err();
            assert!(
                matches!(err, LlmError::StreamFormat(_)),
                "{input}: unexpected {err:?}"
            );
        }
    }

    #[test]
    fn test_stops_after_error() {
        let mut stream = values("{}");
        assert!(stream.next().unwrap().is_err());
        assert!(stream.next().is_none());
    }

    #[test]
    fn test_scalar_elements() {
        let got: Vec<Value> = values(r#"[1, -2.5e3,3 ,"four", true,null,[5],{"six":6}]"#)
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(
            got,
            vec![
                json!(1),
                json!(-2500.0),
                json!(3),
                json!("four"),
                json!(true),
                Value::Null,
                json!([5]),
                json!({"six": 6}),
            ]
        );
    }

    #[test]
    fn test_number_before_close() {
        let got = collect_chunked(b"[10,20]", vec![1]);
        assert_eq!(got, vec![json!(10), json!(20)]);
    }

    #[test]
    fn test_missing_separator() {
        let mut stream = values(r#"[{"a":1} {"b":2}]"#);
        assert!(stream.next_element().unwrap().is_some());
        let err = stream.next_element().unwrap_err();
        assert!(matches!(err, LlmError::StreamFormat(_)));
    }

    #[test]
    fn test_trailing_comma() {
        let mut stream = values("[1,]");
        assert_eq!(stream.next_element().unwrap(), Some(json!(1)));
        assert!(matches!(
            stream.next_element().unwrap_err(),
            LlmError::StreamFormat(_)
        ));
    }

    #[test]
    fn test_malformed_element_is_json_error() {
        let mut stream = values(r#"[{"a": }]"#);
        let err = stream.next_element().unwrap_err();
        assert!(matches!(err, LlmError::Json(_)));
    }

    #[test]
    fn test_typed_element_mismatch() {
        let mut stream: ArrayStream<_, Chunk> = ArrayStream::new(&b"[{\"nope\": 1}]"[..]);
        assert!(matches!(stream.next_element(), Err(LlmError::Json(_))));
    }

    #[test]
    fn test_truncated_array_is_io_error() {
        let mut stream = values(r#"[{"a":1},"#);
        assert!(stream.next_element().unwrap().is_some());
        match stream.next_element() {
            Err(LlmError::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::UnexpectedEof),
            other => panic!("expected io error, got {other:?}"),
        }
    }

    #[test]
    fn test_truncated_element_is_io_error() {
        let mut stream = values(r#"[{"a":"#);
        assert!(matches!(stream.next_element(), Err(LlmError::Io(_))));
    }

    #[test]
    fn test_read_failure_is_io_error() {
        let reader = BufReader::with_capacity(4, Broken { data: b"[{\"a\":1}," });
        let mut stream: ArrayStream<_, Value> = ArrayStream::new(reader);
        assert_eq!(stream.next_element().unwrap(), Some(json!({"a": 1})));
        match stream.next_element() {
            Err(LlmError::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::ConnectionReset),
            other => panic!("expected io error, got {other:?}"),
        }
        assert!(stream.next_element().unwrap().is_none());
    }

    #[test]
    fn test_read_failure_inside_element_is_io_error() {
        let reader = BufReader::with_capacity(2, Broken { data: b"[{\"a\":" });
        let mut stream: ArrayStream<_, Value> = ArrayStream::new(reader);
        match stream.next_element() {
            Err(LlmError::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::ConnectionReset),
            other => panic!("expected io error, got {other:?}"),
        }
        assert!(stream.next_element().unwrap().is_none());
    }

    #[test]
    fn test_borrowed_source_keeps_position() {
        let mut source: &[u8] = b"[1] trailing";
        {
            let mut stream: ArrayStream<_, Value> = ArrayStream::new(&mut source);
            assert_eq!(stream.next_element().unwrap(), Some(json!(1)));
            assert!(stream.next_element().unwrap().is_none());
        }
        assert_eq!(source, b" trailing");
    }

    fn element() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::from),
            any::<i64>().prop_map(Value::from),
            "[a-zA-Z0-9 ,\\[\\]{}\"\\\\']{0,12}".prop_map(Value::from),
        ];
        leaf.prop_recursive(3, 16, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::from),
                prop::collection::btree_map("[a-z]{1,4}", inner, 0..4)
                    .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        })
    }

    fn render(elements: &[Value], gaps: &[&str]) -> String {
        let mut out = String::from("[");
        for (i, element) in elements.iter().enumerate() {
            if i > 0 {
                out.push_str(gaps[i % gaps.len()]);
                out.push(',');
                out.push_str(gaps[(i + 1) % gaps.len()]);
            }
            out.push_str(&element.to_string());
        }
        out.push_str("\n]\n");
        out
    }

    proptest! {
        #[test]
        fn prop_order_survives_any_chunking(
            elements in prop::collection::vec(element(), 0..8),
            sizes in prop::collection::vec(1usize..9, 1..6),
        ) {
            let input = render(&elements, &["", " ", "\n", "\r\n\t"]);
            let got = collect_chunked(input.as_bytes(), sizes);
            prop_assert_eq!(got, elements);
        }

        #[test]
        fn prop_whole_and_bytewise_agree(elements in prop::collection::vec(element(), 0..8)) {
            let input = render(&elements, &[" "]);
            let whole: Vec<Value> = ArrayStream::new(input.as_bytes())
                .collect::<Result<_>>()
                .unwrap();
            let bytewise = collect_chunked(input.as_bytes(), vec![1]);
            prop_assert_eq!(whole, bytewise);
        }
    }
}
