// src/processor/shard.rs
//
// Shard materialization: turn manifest entries into per-utterance records.
//
// Two layouts are supported:
//   * tar shards (local path, file:// or http(s) URL) whose members are grouped
//     by file prefix, e.g. `utt1.wav` + `utt1.txt`
//   * raw lists, where every entry is a JSON line naming one wav file

use std::fs::File;
use std::io::{BufReader, Cursor, Read};

use bytes::Bytes;
use log::{debug, warn};
use serde::Deserialize;

use crate::data_loader::dataset::DatasetError;
use crate::processor::audio::{decode_wav, load_wav, AUDIO_FORMATS};
use crate::processor::Record;

/// Where a shard entry lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    File,
    Http,
}

/// Infer the scheme of a shard entry; entries without one are local paths.
pub fn infer_scheme(src: &str) -> Scheme {
    if src.starts_with("http://") || src.starts_with("https://") {
        Scheme::Http
    } else {
        Scheme::File
    }
}

/// Open a byte stream over one shard.
pub fn open_shard(src: &str) -> Result<Box<dyn Read + Send>, DatasetError> {
    match infer_scheme(src) {
        Scheme::File => {
            let path = src.strip_prefix("file://").unwrap_or(src);
            let file = File::open(path).map_err(|e| DatasetError::io(path, e))?;
            Ok(Box::new(BufReader::new(file)))
        }
        Scheme::Http => {
            let shard_err = |e: reqwest::Error| DatasetError::Shard {
                src: src.to_string(),
                reason: e.to_string(),
            };
            let resp = reqwest::blocking::get(src)
                .and_then(|r| r.error_for_status())
                .map_err(shard_err)?;
            Ok(Box::new(resp))
        }
    }
}

/// A record paired with the open stream of the shard it names.
pub struct OpenedShard {
    pub record: Record,
    pub stream: Box<dyn Read + Send>,
}

impl std::fmt::Debug for OpenedShard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenedShard")
            .field("src", &self.record.src)
            .finish_non_exhaustive()
    }
}

/// Open every shard entry; entries that cannot be opened are skipped.
pub fn url_opener<I>(data: I) -> impl Iterator<Item = OpenedShard> + Send + 'static
where
    I: Iterator<Item = Record> + Send + 'static,
{
    data.filter_map(|record| match open_shard(&record.src) {
        Ok(stream) => Some(OpenedShard { record, stream }),
        Err(e) => {
            warn!("failed to open {}: {e}", record.src);
            None
        }
    })
}

/// Split a member name at its last `.` into (prefix, suffix).
fn split_member_name(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(pos) => (&name[..pos], &name[pos + 1..]),
        None => (name, ""),
    }
}

/// Consecutive tar members sharing one prefix.
#[derive(Debug, Default)]
struct MemberGroup {
    prefix: String,
    members: Vec<(String, Bytes)>,
}

const BLOCK: usize = 512;

/// Regular-file members of a tar stream, read one at a time.
///
/// Only the current member is held in memory. A member is never sized from
/// its header alone: bytes are buffered as they arrive, so a header claiming
/// more data than the stream holds ends the shard with a warning. The stream
/// is dropped as soon as the archive ends or fails.
struct TarMembers {
    src: String,
    stream: Option<Box<dyn Read + Send>>,
    long_name: Option<String>,
    count: usize,
}

impl TarMembers {
    fn new(src: String, stream: Box<dyn Read + Send>) -> Self {
        Self {
            src,
            stream: Some(stream),
            long_name: None,
            count: 0,
        }
    }

    /// Next header, or `None` at the end-of-archive marker or a clean EOF.
    fn read_header(stream: &mut dyn Read) -> std::io::Result<Option<tar::Header>> {
        let mut header = tar::Header::new_old();
        let block = header.as_mut_bytes();
        let mut filled = 0;
        while filled < BLOCK {
            match stream.read(&mut block[filled..])? {
                0 if filled == 0 => return Ok(None),
                0 => return Err(std::io::ErrorKind::UnexpectedEof.into()),
                n => filled += n,
            }
        }
        if block.iter().all(|&b| b == 0) {
            return Ok(None);
        }
        let sum: u32 = block
            .iter()
            .enumerate()
            .map(|(i, &b)| if (148..156).contains(&i) { u32::from(b' ') } else { u32::from(b) })
            .sum();
        if header.cksum()? != sum {
            return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "bad header checksum"));
        }
        Ok(Some(header))
    }

    /// Read `size` payload bytes plus block padding.
    fn read_payload(stream: &mut dyn Read, size: u64, keep: bool) -> std::io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        let got = if keep {
            Read::take(&mut *stream, size).read_to_end(&mut buf)? as u64
        } else {
            std::io::copy(&mut Read::take(&mut *stream, size), &mut std::io::sink())?
        };
        if got < size {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("member declares {size} bytes, stream holds {got}"),
            ));
        }
        let pad = (BLOCK - (size % BLOCK as u64) as usize) % BLOCK;
        stream.read_exact(&mut [0u8; BLOCK][..pad])?;
        Ok(buf)
    }

    fn next_member(&mut self, stream: &mut dyn Read) -> std::io::Result<Option<(String, Bytes)>> {
        loop {
            let Some(header) = Self::read_header(stream)? else {
                return Ok(None);
            };
            let size = header.entry_size()?;
            let kind = header.entry_type();
            if kind.is_gnu_longname() {
                let raw = Self::read_payload(stream, size, true)?;
                let name = String::from_utf8_lossy(&raw);
                self.long_name = Some(name.trim_end_matches('\0').to_string());
                continue;
            }
            if !kind.is_file() {
                Self::read_payload(stream, size, false)?;
                self.long_name = None;
                continue;
            }
            let name = match self.long_name.take() {
                Some(name) => name,
                None => header.path()?.to_string_lossy().into_owned(),
            };
            let data = Self::read_payload(stream, size, true)?;
            return Ok(Some((name, Bytes::from(data))));
        }
    }
}

impl Iterator for TarMembers {
    type Item = (String, Bytes);

    fn next(&mut self) -> Option<Self::Item> {
        let mut stream = self.stream.take()?;
        match self.next_member(&mut *stream) {
            Ok(Some(member)) => {
                self.count += 1;
                self.stream = Some(stream);
                Some(member)
            }
            Ok(None) => None,
            Err(e) => {
                warn!("corrupt tar {}, stopping after {} members: {e}", self.src, self.count);
                None
            }
        }
    }
}

/// Groups consecutive members by prefix as they are read.
struct MemberGroups<I: Iterator<Item = (String, Bytes)>> {
    members: std::iter::Peekable<I>,
}

impl<I: Iterator<Item = (String, Bytes)>> Iterator for MemberGroups<I> {
    type Item = MemberGroup;

    fn next(&mut self) -> Option<MemberGroup> {
        let (name, data) = self.members.next()?;
        let (prefix, suffix) = split_member_name(&name);
        let mut group = MemberGroup {
            prefix: prefix.to_string(),
            members: vec![(suffix.to_string(), data)],
        };
        while let Some((name, data)) = self
            .members
            .next_if(|(name, _)| split_member_name(name).0 == group.prefix)
        {
            group.members.push((split_member_name(&name).1.to_string(), data));
        }
        Some(group)
    }
}

fn group_members<I: Iterator<Item = (String, Bytes)>>(members: I) -> MemberGroups<I> {
    MemberGroups {
        members: members.peekable(),
    }
}

/// Decode one member group into a record.
fn materialize(group: MemberGroup, template: &Record) -> Result<Record, String> {
    let mut rec = template.clone();
    rec.key = Some(group.prefix);
    for (suffix, data) in group.members {
        if suffix == "txt" {
            let txt = std::str::from_utf8(&data).map_err(|e| format!("txt is not utf-8: {e}"))?;
            rec.txt = Some(txt.trim().to_string());
        } else if suffix == "wav" {
            let (wav, sr) = decode_wav(Cursor::new(data)).map_err(|e| e.to_string())?;
            rec.wav = Some(wav);
            rec.sample_rate = Some(sr);
        } else if AUDIO_FORMATS.contains(&suffix.as_str()) {
            return Err(format!("unsupported audio format `{suffix}`"));
        } else {
            rec.extra.insert(suffix, data);
        }
    }
    if rec.wav.is_none() || rec.txt.is_none() {
        return Err("missing wav or txt member".to_string());
    }
    Ok(rec)
}

/// Expand each opened tar shard into one record per member group.
///
/// Members are read as records are pulled, so at most one group of a shard
/// is in memory. The shard stream is closed when the archive ends, fails, or
/// the consumer stops.
pub fn tar_file_and_group<I>(data: I) -> impl Iterator<Item = Record> + Send + 'static
where
    I: Iterator<Item = OpenedShard> + Send + 'static,
{
    data.flat_map(|OpenedShard { record, stream }| {
        debug!("reading tar {}", record.src);
        let groups = group_members(TarMembers::new(record.src.clone(), stream));
        groups.filter_map(move |group| {
            let prefix = group.prefix.clone();
            match materialize(group, &record) {
                Ok(rec) => Some(rec),
                Err(e) => {
                    warn!("error to parse {prefix} in {}: {e}", record.src);
                    None
                }
            }
        })
    })
}

#[derive(Debug, Deserialize)]
struct RawEntry {
    key: String,
    wav: String,
    txt: String,
    #[serde(default)]
    start: Option<f64>,
    #[serde(default)]
    end: Option<f64>,
}

fn parse_raw_entry(rec: Record) -> Result<Record, DatasetError> {
    let entry: RawEntry = serde_json::from_str(&rec.src)?;
    let (wav, sr) = load_wav(&entry.wav, entry.start, entry.end)?;
    Ok(Record {
        key: Some(entry.key),
        wav: Some(wav),
        sample_rate: Some(sr),
        txt: Some(entry.txt),
        ..rec
    })
}

/// Load the wav named by every raw JSON entry.
pub fn parse_raw<I>(data: I) -> impl Iterator<Item = Record> + Send + 'static
where
    I: Iterator<Item = Record> + Send + 'static,
{
    data.filter_map(|rec| {
        let src = rec.src.clone();
        match parse_raw_entry(rec) {
            Ok(rec) => Some(rec),
            Err(e) => {
                warn!("failed to read {src}: {e}");
                None
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_loader::sampler::DistributionContext;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn wav_bytes(samples: &[i16], sr: u32) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: sr,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut w = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for &s in samples {
                w.write_sample(s).unwrap();
            }
            w.finalize().unwrap();
        }
        cursor.into_inner()
    }

    fn write_tar(path: &Path, members: &[(&str, Vec<u8>)]) {
        let mut builder = tar::Builder::new(File::create(path).unwrap());
        for (name, data) in members {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, data.as_slice()).unwrap();
        }
        builder.finish().unwrap();
    }

    fn shard_record(path: &Path) -> Record {
        Record::new(path.display().to_string(), DistributionContext::default())
    }

    #[test]
    fn member_names_split_at_last_dot() {
        assert_eq!(split_member_name("a/utt1.wav"), ("a/utt1", "wav"));
        assert_eq!(split_member_name("x.y.txt"), ("x.y", "txt"));
        assert_eq!(split_member_name("noext"), ("noext", ""));
    }

    #[test]
    fn scheme_inference() {
        assert_eq!(infer_scheme("/data/shard.tar"), Scheme::File);
        assert_eq!(infer_scheme("file:///data/shard.tar"), Scheme::File);
        assert_eq!(infer_scheme("https://host/shard.tar"), Scheme::Http);
    }

    #[test]
    fn groups_members_by_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let tar_path = dir.path().join("s0.tar");
        write_tar(
            &tar_path,
            &[
                ("utt1.txt", b" hello \n".to_vec()),
                ("utt1.wav", wav_bytes(&[0; 160], 16000)),
                ("utt1.spk", b"S1".to_vec()),
                ("utt2.txt", b"world".to_vec()),
                ("utt2.wav", wav_bytes(&[0; 320], 16000)),
            ],
        );
        let out: Vec<Record> =
            tar_file_and_group(url_opener(vec![shard_record(&tar_path)].into_iter())).collect();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].key.as_deref(), Some("utt1"));
        assert_eq!(out[0].txt.as_deref(), Some("hello"));
        assert_eq!(out[0].num_samples(), 160);
        assert_eq!(out[0].extra.get("spk").map(|b| &b[..]), Some(&b"S1"[..]));
        assert_eq!(out[1].key.as_deref(), Some("utt2"));
        assert_eq!(out[1].num_samples(), 320);
        assert_eq!(out[1].src, tar_path.display().to_string());
    }

    #[test]
    fn corrupt_member_drops_only_its_group() {
        let dir = tempfile::tempdir().unwrap();
        let tar_path = dir.path().join("s1.tar");
        write_tar(
            &tar_path,
            &[
                ("bad.txt", b"x".to_vec()),
                ("bad.wav", b"not a wav".to_vec()),
                ("mp.txt", b"y".to_vec()),
                ("mp.mp3", b"id3".to_vec()),
                ("good.txt", b"z".to_vec()),
                ("good.wav", wav_bytes(&[1; 16], 16000)),
            ],
        );
        let out: Vec<Record> =
            tar_file_and_group(url_opener(vec![shard_record(&tar_path)].into_iter())).collect();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].key.as_deref(), Some("good"));
    }

    fn tar_bytes(members: &[(&str, Vec<u8>)]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (name, data) in members {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, data.as_slice()).unwrap();
        }
        builder.into_inner().unwrap()
    }

    /// A member header claiming far more data than follows it.
    fn oversized_member(name: &str) -> Vec<u8> {
        let mut header = tar::Header::new_gnu();
        header.set_path(name).unwrap();
        header.set_size(1 << 42);
        header.set_mode(0o644);
        header.set_cksum();
        let mut out = header.as_bytes().to_vec();
        out.extend(vec![7u8; 1024]);
        out
    }

    fn opened(src: &str, bytes: Vec<u8>) -> OpenedShard {
        OpenedShard {
            record: Record::new(src, DistributionContext::default()),
            stream: Box::new(Cursor::new(bytes)),
        }
    }

    #[test]
    fn oversized_member_header_ends_only_that_shard() {
        let mut bad = tar_bytes(&[
            ("kept.txt", b"a".to_vec()),
            ("kept.wav", wav_bytes(&[0; 16], 16000)),
        ]);
        // drop the end-of-archive blocks, then append the lying header
        bad.truncate(bad.len() - 2 * BLOCK);
        bad.extend(oversized_member("huge.wav"));
        let good = tar_bytes(&[
            ("next.txt", b"b".to_vec()),
            ("next.wav", wav_bytes(&[0; 16], 16000)),
        ]);

        let shards = vec![opened("bad.tar", bad), opened("good.tar", good)];
        let keys: Vec<String> = tar_file_and_group(shards.into_iter())
            .filter_map(|r| r.key)
            .collect();
        assert_eq!(keys, vec!["kept", "next"]);
    }

    #[test]
    fn lone_oversized_member_yields_nothing() {
        let shards = vec![opened("huge.tar", oversized_member("huge.wav"))];
        assert_eq!(tar_file_and_group(shards.into_iter()).count(), 0);
    }

    /// Counts the bytes pulled out of the wrapped reader.
    struct Metered {
        inner: Cursor<Vec<u8>>,
        read: Arc<AtomicUsize>,
    }

    impl Read for Metered {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            let n = self.inner.read(buf)?;
            self.read.fetch_add(n, Ordering::SeqCst);
            Ok(n)
        }
    }

    #[test]
    fn members_are_read_as_records_are_pulled() {
        let keys: Vec<String> = (0..8).map(|i| format!("utt{i}")).collect();
        let mut owned = Vec::new();
        for key in &keys {
            owned.push((format!("{key}.txt"), b"x".to_vec()));
            owned.push((format!("{key}.wav"), wav_bytes(&[0; 8000], 16000)));
        }
        let members: Vec<(&str, Vec<u8>)> = owned.iter().map(|(n, d)| (n.as_str(), d.clone())).collect();
        let bytes = tar_bytes(&members);
        let total = bytes.len();

        let read = Arc::new(AtomicUsize::new(0));
        let shard = OpenedShard {
            record: Record::new("metered.tar", DistributionContext::default()),
            stream: Box::new(Metered {
                inner: Cursor::new(bytes),
                read: Arc::clone(&read),
            }),
        };
        let mut out = tar_file_and_group(vec![shard].into_iter());
        assert_eq!(out.next().and_then(|r| r.key).as_deref(), Some("utt0"));
        // the first group plus a look at the next member's name
        assert!(read.load(Ordering::SeqCst) < total / 4);
        assert_eq!(out.count(), 7);
        // reading stops at the first end-of-archive block
        assert_eq!(read.load(Ordering::SeqCst), total - BLOCK);
    }

    #[test]
    fn long_member_names_are_kept() {
        let prefix = format!("{}/utt", "d".repeat(120));
        let txt = format!("{prefix}.txt");
        let wav = format!("{prefix}.wav");
        let bytes = tar_bytes(&[(txt.as_str(), b"long".to_vec()), (wav.as_str(), wav_bytes(&[0; 16], 16000))]);
        let out: Vec<Record> = tar_file_and_group(vec![opened("long.tar", bytes)].into_iter()).collect();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].key.as_deref(), Some(prefix.as_str()));
        assert_eq!(out[0].txt.as_deref(), Some("long"));
    }

    #[test]
    fn unopenable_shards_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.tar");
        let out: Vec<OpenedShard> = url_opener(vec![shard_record(&missing)].into_iter()).collect();
        assert!(out.is_empty());
    }

    #[test]
    fn raw_entries_load_segments() {
        let dir = tempfile::tempdir().unwrap();
        let wav_path = dir.path().join("a.wav");
        std::fs::write(&wav_path, wav_bytes(&[0; 1000], 1000)).unwrap();
        let line = serde_json::json!({
            "key": "a", "wav": wav_path, "txt": "abc", "start": 0.25, "end": 0.75
        })
        .to_string();
        let recs = vec![
            Record::new(line, DistributionContext::default()),
            Record::new("{not json", DistributionContext::default()),
        ];
        let out: Vec<Record> = parse_raw(recs.into_iter()).collect();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].key.as_deref(), Some("a"));
        assert_eq!(out[0].txt.as_deref(), Some("abc"));
        assert_eq!(out[0].num_samples(), 500);
        assert_eq!(out[0].sample_rate, Some(1000));
    }
}
