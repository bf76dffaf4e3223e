//! Deliver a finished job output file.
//!
//! Oversized output keeps only its head and tail.  Timestamp samples are
//! turned into annotation lines, each placed just after the line which was
//! being written when the sample was taken.
//!
//! Nothing is logged from here.  The destination is usually our own stdout.

use std::io::{Read, Seek, SeekFrom, Write};

use super::config::Zone;
use super::err::{Error, Result};
use super::sampler::TimestampSample;

/// Replaces the middle of oversized output
pub const ELISION_MARKER: &[u8] = b"\n...[excess bytes elided]...\n";

const TIMESTAMP_FORMAT: &str = "%Y%m%d-%H:%M:%S";

const CHUNK_SIZE: usize = 4096;

pub struct OutputRenderer {
    zone: Zone,
    chunk: usize,
}

impl OutputRenderer {
    pub fn new(zone: Zone) -> OutputRenderer {
        OutputRenderer {
            zone,
            chunk: CHUNK_SIZE,
        }
    }

    /// Read the output in pieces of this many bytes
    pub fn chunk_size(mut self, chunk: usize) -> Self {
        assert!(chunk > 0);
        self.chunk = chunk;
        self
    }

    /// The annotation line inserted for one sample
    pub fn annotation(&self, sample: &TimestampSample) -> String {
        format!(
            "...[timestamp {} inserted by autodriver at offset ~{}. Maybe out of sync with output's own timestamps.]...\n",
            self.zone.format(&sample.time, TIMESTAMP_FORMAT),
            sample.offset
        )
    }

    /// Copy the first `size` bytes of `src` to `dst`, truncated to `cap` bytes
    /// if necessary, with annotations for `samples`.
    pub fn render<R, W>(
        &self,
        src: &mut R,
        size: u64,
        samples: &[TimestampSample],
        cap: Option<u64>,
        dst: &mut W,
    ) -> Result<()>
    where
        R: Read + Seek,
        W: Write,
    {
        let mut pass = Annotate {
            renderer: self,
            samples,
            next: 0,
            size,
            boundary: 0,
        };

        match cap {
            Some(cap) if size > cap => {
                let part = cap / 2;
                pass.stream(src, 0, part, dst)?;
                put(dst, ELISION_MARKER)?;
                pass.stream(src, size - part, size, dst)?;
            }
            _ => pass.stream(src, 0, size, dst)?,
        }
        dst.flush().map_err(|e| Error::os("flush output", e))
    }
}

fn put<W: Write>(dst: &mut W, buf: &[u8]) -> Result<()> {
    // write_all() retries short writes
    dst.write_all(buf).map_err(|e| Error::os("write output", e))
}

/// Progress through the sample list, shared by both halves of truncated output
struct Annotate<'a> {
    renderer: &'a OutputRenderer,
    samples: &'a [TimestampSample],
    next: usize,
    /// total bytes in the file
    size: u64,
    /// just past the last line emitted with an annotation
    boundary: u64,
}

impl<'a> Annotate<'a> {
    /// Copy byte range [start, end) of `src`
    fn stream<R, W>(&mut self, src: &mut R, start: u64, end: u64, dst: &mut W) -> Result<()>
    where
        R: Read + Seek,
        W: Write,
    {
        src.seek(SeekFrom::Start(start))
            .map_err(|e| Error::os("seek output file", e))?;
        // samples from before this range are never annotated
        self.boundary = start;

        let mut buf = vec![0u8; self.renderer.chunk];
        let mut pos = start;
        while pos < end {
            let want = (end - pos).min(buf.len() as u64) as usize;
            let n = match src.read(&mut buf[..want]) {
                Ok(0) => break, // shrunk since size was taken
                Ok(n) => n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::os("read output file", e)),
            };
            self.chunk(&buf[..n], pos, dst)?;
            pos += n as u64;
        }
        Ok(())
    }

    /// Emit one chunk beginning at file offset `base`
    fn chunk<W: Write>(&mut self, buf: &[u8], base: u64, dst: &mut W) -> Result<()> {
        let end = base + buf.len() as u64;
        let mut flushed = 0usize;

        while let Some(sample) = self.samples.get(self.next) {
            if sample.offset < self.boundary {
                // line already annotated, or in an elided region
                self.next += 1;
                continue;
            }
            if sample.offset >= end {
                break;
            }
            if sample.offset + 1 >= self.size {
                // the final line belongs to the job
                self.next += 1;
                continue;
            }

            let from = (sample.offset.max(base) - base) as usize;
            let eol = match buf[from..].iter().position(|&b| b == b'\n') {
                Some(i) => from + i,
                // line continues into the next chunk, as does this sample
                None => break,
            };

            put(dst, &buf[flushed..=eol])?;
            flushed = eol + 1;
            self.boundary = base + flushed as u64;
            if self.boundary < self.size {
                put(dst, self.renderer.annotation(sample).as_bytes())?;
            }
            self.next += 1;
        }

        put(dst, &buf[flushed..])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::io::Cursor;

    fn utc() -> OutputRenderer {
        OutputRenderer::new("UTC".parse().unwrap())
    }

    fn sample(secs: u32, offset: u64) -> TimestampSample {
        TimestampSample {
            time: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, secs).unwrap(),
            offset,
        }
    }

    fn run(r: &OutputRenderer, input: &[u8], samples: &[TimestampSample], cap: Option<u64>) -> Vec<u8> {
        let mut out = Vec::new();
        r.render(&mut Cursor::new(input), input.len() as u64, samples, cap, &mut out)
            .unwrap();
        out
    }

    fn note(secs: u32, offset: u64) -> String {
        utc().annotation(&sample(secs, offset))
    }

    fn strip_notes(out: &[u8]) -> Vec<u8> {
        let text = String::from_utf8(out.to_vec()).unwrap();
        text.split_inclusive('\n')
            .filter(|l| !l.starts_with("...[timestamp "))
            .collect::<String>()
            .into_bytes()
    }

    #[test]
    fn annotation_text() {
        assert_eq!(
            note(7, 1234),
            "...[timestamp 20240301-12:00:07 inserted by autodriver at offset ~1234. Maybe out of sync with output's own timestamps.]...\n"
        );
    }

    #[test]
    fn passthrough() {
        let input = b"line one\nline two\nscore: 100\n";
        assert_eq!(run(&utc(), input, &[], None), input.to_vec());
        assert_eq!(run(&utc(), input, &[], Some(1000)), input.to_vec());
        assert_eq!(run(&utc(), b"", &[], Some(10)), b"".to_vec());
    }

    #[test]
    fn annotate_after_line() {
        let input = b"aaaa\nbbbb\ncccc\n";
        let out = run(&utc(), input, &[sample(1, 2), sample(2, 7)], None);
        let expect = format!("aaaa\n{}bbbb\n{}cccc\n", note(1, 2), note(2, 7));
        assert_eq!(String::from_utf8(out).unwrap(), expect);
    }

    #[test]
    fn annotate_at_line_start() {
        // a sample offset exactly on a newline annotates that line
        let input = b"aaaa\nbbbb\ncccc\n";
        let out = run(&utc(), input, &[sample(1, 4)], None);
        let expect = format!("aaaa\n{}bbbb\ncccc\n", note(1, 4));
        assert_eq!(String::from_utf8(out).unwrap(), expect);
    }

    #[test]
    fn one_note_per_line() {
        let input = b"a long line\nnext\nlast\n";
        let out = run(&utc(), input, &[sample(1, 1), sample(2, 3), sample(3, 5)], None);
        let expect = format!("a long line\n{}next\nlast\n", note(1, 1));
        assert_eq!(String::from_utf8(out).unwrap(), expect);
    }

    #[test]
    fn final_byte_reserved() {
        let input = b"build ok\n{\"scores\": 1}\n";
        let last = input.len() as u64 - 1;
        // a sample in the final line would land after the final byte
        let out = run(&utc(), input, &[sample(1, 12), sample(2, last), sample(3, last + 1)], None);
        assert_eq!(out, input.to_vec());
    }

    #[test]
    fn unterminated_tail() {
        let input = b"line\nno newline at end";
        let out = run(&utc(), input, &[sample(1, 7)], None);
        assert_eq!(out, input.to_vec());
    }

    #[test]
    fn line_spans_chunks() {
        let input = b"0123456789abcdefghij\nxyz\nend\n";
        let small = utc().chunk_size(4);
        let out = run(&small, input, &[sample(1, 2), sample(2, 22)], None);
        let expect = format!("0123456789abcdefghij\n{}xyz\n{}end\n", note(1, 2), note(2, 22));
        assert_eq!(String::from_utf8(out).unwrap(), expect);

        // every chunk size agrees
        let whole = run(&utc(), input, &[sample(1, 2), sample(2, 22)], None);
        for n in 1..input.len() + 2 {
            assert_eq!(
                run(&utc().chunk_size(n), input, &[sample(1, 2), sample(2, 22)], None),
                whole,
                "chunk {}",
                n
            );
        }
    }

    #[test]
    fn truncate_once() {
        let input: Vec<u8> = (0..200).flat_map(|i| format!("line {:04}\n", i).into_bytes()).collect();
        assert_eq!(input.len(), 2000);
        let out = run(&utc(), &input, &[], Some(100));

        let mut expect = input[..50].to_vec();
        expect.extend_from_slice(ELISION_MARKER);
        expect.extend_from_slice(&input[1950..]);
        assert_eq!(out, expect);
        assert_eq!(
            out.windows(ELISION_MARKER.len()).filter(|w| *w == ELISION_MARKER).count(),
            1
        );
    }

    #[test]
    fn not_truncated_at_cap() {
        let input = vec![b'x'; 100];
        assert_eq!(run(&utc(), &input, &[], Some(100)), input);
    }

    #[test]
    fn truncate_drops_middle_samples() {
        let input: Vec<u8> = (0..200).flat_map(|i| format!("line {:04}\n", i).into_bytes()).collect();
        // head, middle, tail, tail again in the same line
        let samples = [sample(1, 3), sample(2, 1000), sample(3, 1955), sample(4, 1957)];
        let out = run(&utc(), &input, &samples, Some(100));

        let mut expect = input[..10].to_vec();
        expect.extend_from_slice(note(1, 3).as_bytes());
        expect.extend_from_slice(&input[10..50]);
        expect.extend_from_slice(ELISION_MARKER);
        // the tail begins with line 195, ending at 1959
        expect.extend_from_slice(&input[1950..1960]);
        expect.extend_from_slice(note(3, 1955).as_bytes());
        expect.extend_from_slice(&input[1960..]);
        assert_eq!(String::from_utf8(out).unwrap(), String::from_utf8(expect).unwrap());
    }

    #[test]
    fn pending_head_sample_not_carried() {
        // sample in the head whose line is cut by the elision
        let input: Vec<u8> = (0..100).flat_map(|_| b"abcdefghi\n".to_vec()).collect();
        let out = run(&utc(), &input, &[sample(1, 42)], Some(86));
        let mut expect = input[..43].to_vec();
        expect.extend_from_slice(ELISION_MARKER);
        expect.extend_from_slice(&input[957..]);
        assert_eq!(out, expect);
    }

    #[test]
    fn idempotent() {
        let input: Vec<u8> = (0..500).flat_map(|i| format!("output {}\n", i).into_bytes()).collect();
        let samples: Vec<_> = (0..20).map(|i| sample(i, i as u64 * 200)).collect();
        let r = utc().chunk_size(64);
        let first = run(&r, &input, &samples, Some(2000));
        let second = run(&r, &input, &samples, Some(2000));
        assert_eq!(first, second);
    }

    #[test]
    fn notes_only_at_line_ends() {
        let input: Vec<u8> = (0..300).flat_map(|i| format!("{}\n", "y".repeat(i % 17)).into_bytes()).collect();
        let samples: Vec<_> = (0..40).map(|i| sample(i, i as u64 * 67)).collect();
        let out = run(&utc().chunk_size(16), &input, &samples, None);

        // removing annotations restores the original exactly
        assert_eq!(strip_notes(&out), input);
        // and every annotation follows a newline
        let text = String::from_utf8(out).unwrap();
        let mut prev_end_nl = true;
        for line in text.split_inclusive('\n') {
            if line.starts_with("...[timestamp ") {
                assert!(prev_end_nl);
            }
            prev_end_nl = line.ends_with('\n');
        }
        assert!(!text.ends_with("timestamps.]...\n"));
    }

    #[test]
    fn size_snapshot_ignores_growth() {
        let input = b"first\nsecond\nlate growth\n";
        let mut out = Vec::new();
        utc()
            .render(&mut Cursor::new(&input[..]), 13, &[], None, &mut out)
            .unwrap();
        assert_eq!(out, b"first\nsecond\n".to_vec());
    }

    struct Broken;

    impl Write for Broken {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::from_raw_os_error(libc::EPIPE))
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn write_failure() {
        let err = utc()
            .render(&mut Cursor::new(b"data\n"), 5, &[], None, &mut Broken)
            .unwrap_err();
        assert!(matches!(err, Error::OS { .. }));
    }

    /// Accepts at most 3 bytes per call
    struct Trickle(Vec<u8>);

    impl Write for Trickle {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            let n = buf.len().min(3);
            self.0.extend_from_slice(&buf[..n]);
            Ok(n)
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn short_writes_drained() {
        let input = b"partial writes\nare retried\nfully\n";
        let mut out = Trickle(vec![]);
        utc()
            .render(&mut Cursor::new(&input[..]), input.len() as u64, &[sample(0, 3)], None, &mut out)
            .unwrap();
        assert_eq!(strip_notes(&out.0), input.to_vec());
        assert_eq!(out.0.len(), input.len() + note(0, 3).len());
    }

    /// Records what is logged from this module
    struct Capture(std::sync::Mutex<Vec<String>>);

    impl log::Log for Capture {
        fn enabled(&self, _metadata: &log::Metadata) -> bool {
            true
        }
        fn log(&self, record: &log::Record) {
            if record.target().starts_with("autodriver::render") {
                self.0.lock().unwrap().push(record.args().to_string());
            }
        }
        fn flush(&self) {}
    }

    static CAPTURE: Capture = Capture(std::sync::Mutex::new(Vec::new()));

    #[test]
    fn silent_while_writing() {
        let _ = log::set_logger(&CAPTURE);
        log::set_max_level(log::LevelFilter::Trace);

        let input: Vec<u8> = (0..200).flat_map(|i| format!("line {}\n", i).into_bytes()).collect();
        let out = run(&utc(), &input, &[sample(0, 5), sample(9, 900)], Some(100));
        assert!(out.windows(ELISION_MARKER.len()).any(|w| w == ELISION_MARKER));
        // anything logged would land inside the job output
        assert!(CAPTURE.0.lock().unwrap().is_empty());
    }
}
