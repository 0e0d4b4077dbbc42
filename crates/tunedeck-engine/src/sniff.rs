//! Format sniffing.
//!
//! Classifies a file by its leading bytes, never by its extension. The Ogg container
//! is shared by several codecs, so `OggS` files get a second look at the first packet.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

use tunedeck_types::FileType;

use crate::error::PlaybackError;

const MAGIC_RIFF: &[u8; 4] = b"RIFF";
const MAGIC_RIFX: &[u8; 4] = b"RIFX";
const MAGIC_RF64: &[u8; 4] = b"RF64";
const MAGIC_FORM: &[u8; 4] = b"FORM";
const MAGIC_WAVE: &[u8; 4] = b"WAVE";
const MAGIC_FLAC: &[u8; 4] = b"fLaC";
const MAGIC_OGG: &[u8; 4] = b"OggS";
const MAGIC_PSID: &[u8; 4] = b"PSID";
const MAGIC_RSID: &[u8; 4] = b"RSID";
const MAGIC_ID3: &[u8; 3] = b"ID3";

const OGG_PAGE_HEADER_LEN: usize = 27;
/// First packets we care about are identification headers; anything longer is cut.
const OGG_PROBE_MAX_PACKET: usize = 64 * 1024;

/// Classify the file at `path`.
///
/// Errors are distinguishable: [`PlaybackError::Io`] when the file cannot be opened
/// or read (OS error preserved), [`PlaybackError::UnsupportedFileType`] when it was
/// read but no signature matched. The file handle is dropped on every path.
pub fn classify(path: &Path) -> Result<FileType, PlaybackError> {
    let mut file = File::open(path).map_err(|e| PlaybackError::io(path, e))?;
    let file_type = classify_reader(&mut file).map_err(|e| PlaybackError::io(path, e))?;
    match file_type {
        Sniffed::Known(t) => Ok(t),
        Sniffed::Unknown { magic } => {
            tracing::debug!(path = %path.display(), magic = ?magic, "unrecognised file signature");
            Err(PlaybackError::UnsupportedFileType { magic })
        }
    }
}

/// Result of sniffing a stream that could be read.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Sniffed {
    Known(FileType),
    /// No signature matched. `magic` is the first four bytes read little-endian,
    /// absent when the stream is shorter than that.
    Unknown { magic: Option<u32> },
}

/// Classify an already opened stream, starting from its beginning.
pub fn classify_reader<R: Read + Seek>(reader: &mut R) -> io::Result<Sniffed> {
    reader.seek(SeekFrom::Start(0))?;
    let mut head = [0u8; 12];
    let n = read_up_to(reader, &mut head)?;
    if n < 4 {
        return Ok(Sniffed::Unknown { magic: None });
    }
    let sig: [u8; 4] = [head[0], head[1], head[2], head[3]];
    let magic = u32::from_le_bytes(sig);

    let known = match &sig {
        MAGIC_RIFF | MAGIC_RIFX | MAGIC_RF64 | MAGIC_FORM => {
            // AVI and friends reuse RIFF; only the WAVE form type is audio we play.
            (n >= 12 && &head[8..12] == MAGIC_WAVE).then_some(FileType::Wav)
        }
        MAGIC_FLAC => Some(FileType::Flac),
        MAGIC_OGG => {
            reader.seek(SeekFrom::Start(0))?;
            probe_ogg(reader)?
        }
        MAGIC_PSID | MAGIC_RSID => Some(FileType::Sid),
        _ => is_mp3_start(&head[..n]).then_some(FileType::Mp3),
    };

    Ok(match known {
        Some(t) => Sniffed::Known(t),
        None => Sniffed::Unknown { magic: Some(magic) },
    })
}

/// MPEG-1 Layer III frame sync (with or without CRC), or a leading ID3v2 tag.
fn is_mp3_start(head: &[u8]) -> bool {
    if head.len() >= 3 && &head[..3] == MAGIC_ID3 {
        return true;
    }
    head.len() >= 2 && head[0] == 0xFF && (head[1] == 0xFB || head[1] == 0xFA)
}

/// Look at the first packet of the first Ogg page and identify its codec mapping.
///
/// Candidates are tried in priority order Opus, FLAC, Vorbis; the first match wins.
/// Returns `None` when the page is malformed or the mapping is unknown.
fn probe_ogg<R: Read>(reader: &mut R) -> io::Result<Option<FileType>> {
    let Some(packet) = read_first_ogg_packet(reader)? else {
        return Ok(None);
    };
    let probes: [(fn(&[u8]) -> bool, FileType); 3] = [
        (|p| p.starts_with(b"OpusHead"), FileType::Opus),
        (|p| p.starts_with(b"\x7fFLAC"), FileType::Flac),
        (|p| p.starts_with(b"\x01vorbis"), FileType::Vorbis),
    ];
    Ok(probes
        .iter()
        .find(|(probe, _)| probe(&packet))
        .map(|(_, t)| *t))
}

fn read_first_ogg_packet<R: Read>(reader: &mut R) -> io::Result<Option<Vec<u8>>> {
    let mut header = [0u8; OGG_PAGE_HEADER_LEN];
    if read_up_to(reader, &mut header)? < OGG_PAGE_HEADER_LEN || &header[..4] != MAGIC_OGG {
        return Ok(None);
    }
    let segments = header[26] as usize;
    let mut lacing = vec![0u8; segments];
    if read_up_to(reader, &mut lacing)? < segments {
        return Ok(None);
    }

    // A packet ends at the first lacing value below 255.
    let mut packet_len = 0usize;
    for value in &lacing {
        packet_len += *value as usize;
        if *value < 255 {
            break;
        }
    }
    let packet_len = packet_len.min(OGG_PROBE_MAX_PACKET);
    let mut packet = vec![0u8; packet_len];
    let got = read_up_to(reader, &mut packet)?;
    packet.truncate(got);
    Ok(Some(packet))
}

/// Fill as much of `buf` as the stream allows; short only at end of stream.
fn read_up_to<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Cursor;

    /// Minimal Ogg page carrying a single packet (checksum left zero; sniffing ignores it).
    pub(crate) fn ogg_page(packet: &[u8]) -> Vec<u8> {
        let mut page = Vec::new();
        page.extend_from_slice(MAGIC_OGG);
        page.push(0); // version
        page.push(0x02); // beginning of stream
        page.extend_from_slice(&0u64.to_le_bytes());
        page.extend_from_slice(&0x1234u32.to_le_bytes());
        page.extend_from_slice(&0u32.to_le_bytes());
        page.extend_from_slice(&0u32.to_le_bytes());
        let mut lacing = Vec::new();
        let mut left = packet.len();
        loop {
            let v = left.min(255);
            lacing.push(v as u8);
            left -= v;
            if v < 255 {
                break;
            }
        }
        page.push(lacing.len() as u8);
        page.extend_from_slice(&lacing);
        page.extend_from_slice(packet);
        page
    }

    fn sniff(bytes: &[u8]) -> Sniffed {
        classify_reader(&mut Cursor::new(bytes.to_vec())).unwrap()
    }

    fn riff(form: &[u8; 4]) -> Vec<u8> {
        let mut v = MAGIC_RIFF.to_vec();
        v.extend_from_slice(&36u32.to_le_bytes());
        v.extend_from_slice(form);
        v.extend_from_slice(b"fmt ");
        v
    }

    #[test]
    fn riff_wave_is_wav() {
        assert_eq!(sniff(&riff(MAGIC_WAVE)), Sniffed::Known(FileType::Wav));
    }

    #[test]
    fn riff_variants_with_wave_are_wav() {
        for magic in [MAGIC_RIFX, MAGIC_RF64, MAGIC_FORM] {
            let mut bytes = riff(MAGIC_WAVE);
            bytes[..4].copy_from_slice(magic);
            assert_eq!(sniff(&bytes), Sniffed::Known(FileType::Wav));
        }
    }

    #[test]
    fn riff_avi_is_not_wav() {
        let out = sniff(&riff(b"AVI "));
        assert_eq!(
            out,
            Sniffed::Unknown {
                magic: Some(u32::from_le_bytes(*MAGIC_RIFF))
            }
        );
    }

    #[test]
    fn truncated_riff_is_not_wav() {
        assert!(matches!(sniff(b"RIFF\0\0\0\0WA"), Sniffed::Unknown { .. }));
    }

    #[test]
    fn native_flac() {
        assert_eq!(sniff(b"fLaC\0\0\0\x22"), Sniffed::Known(FileType::Flac));
    }

    #[test]
    fn ogg_mappings() {
        let mut opus_head = b"OpusHead".to_vec();
        opus_head.extend_from_slice(&[1, 2, 0x38, 0x01, 0x80, 0xBB, 0, 0, 0, 0, 0]);
        assert_eq!(sniff(&ogg_page(&opus_head)), Sniffed::Known(FileType::Opus));
        assert_eq!(
            sniff(&ogg_page(b"\x7fFLAC\x01\x00\x00\x01fLaC")),
            Sniffed::Known(FileType::Flac)
        );
        assert_eq!(
            sniff(&ogg_page(b"\x01vorbis\0\0\0\0\x02")),
            Sniffed::Known(FileType::Vorbis)
        );
    }

    #[test]
    fn ogg_long_first_packet_spans_lacing_values() {
        let mut packet = b"\x01vorbis".to_vec();
        packet.resize(600, 0xAA);
        assert_eq!(sniff(&ogg_page(&packet)), Sniffed::Known(FileType::Vorbis));
    }

    #[test]
    fn ogg_unknown_mapping_is_unsupported() {
        let out = sniff(&ogg_page(b"Speex   "));
        assert_eq!(
            out,
            Sniffed::Unknown {
                magic: Some(u32::from_le_bytes(*MAGIC_OGG))
            }
        );
    }

    #[test]
    fn ogg_truncated_page_is_unsupported() {
        assert!(matches!(sniff(b"OggS\0\x02"), Sniffed::Unknown { .. }));
    }

    #[test]
    fn mp3_frame_sync_and_id3() {
        assert_eq!(sniff(&[0xFF, 0xFB, 0x90, 0x64]), Sniffed::Known(FileType::Mp3));
        assert_eq!(sniff(&[0xFF, 0xFA, 0x90, 0x64]), Sniffed::Known(FileType::Mp3));
        assert_eq!(sniff(b"ID3\x04\0\0\0\0"), Sniffed::Known(FileType::Mp3));
        assert!(matches!(sniff(&[0xFF, 0xF3, 0x90, 0x64]), Sniffed::Unknown { .. }));
    }

    #[test]
    fn sid_tunes() {
        assert_eq!(sniff(b"PSID\0\x02\0\x7c"), Sniffed::Known(FileType::Sid));
        assert_eq!(sniff(b"RSID\0\x02\0\x7c"), Sniffed::Known(FileType::Sid));
    }

    #[test]
    fn short_stream_has_no_magic() {
        assert_eq!(sniff(b"ab"), Sniffed::Unknown { magic: None });
        assert_eq!(sniff(b""), Sniffed::Unknown { magic: None });
    }

    #[test]
    fn unknown_magic_is_reported() {
        assert_eq!(
            sniff(b"MThd\0\0\0\x06"),
            Sniffed::Unknown {
                magic: Some(u32::from_le_bytes(*b"MThd"))
            }
        );
    }

    #[test]
    fn classify_distinguishes_io_from_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.flac");
        match classify(&missing) {
            Err(PlaybackError::Io { source, .. }) => {
                assert_eq!(source.kind(), io::ErrorKind::NotFound)
            }
            other => panic!("expected io error, got {other:?}"),
        }

        let junk = dir.path().join("junk.mp3");
        std::fs::write(&junk, b"not audio at all").unwrap();
        assert!(matches!(
            classify(&junk),
            Err(PlaybackError::UnsupportedFileType { magic: Some(_) })
        ));

        let ogg = dir.path().join("song.ogg");
        std::fs::write(&ogg, ogg_page(b"OpusHead\x01\x02")).unwrap();
        assert_eq!(classify(&ogg).unwrap(), FileType::Opus);
    }

    #[test]
    fn repeated_classify_does_not_leak_handles() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.wav");
        let ogg = dir.path().join("speex.ogg");
        std::fs::write(&ogg, ogg_page(b"Speex   ")).unwrap();
        for _ in 0..4096 {
            assert!(classify(&missing).is_err());
            assert!(classify(&ogg).is_err());
        }
        // Still able to open files afterwards.
        assert!(File::open(&ogg).is_ok());
    }
}
