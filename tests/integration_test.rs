use std::io::Cursor;

use boxrs::archive::{PendingEntry, PendingStream};
use boxrs::filter::chain::{DeflateBuilder, DiffBuilder, FilterChain, LzmaBuilder, XorBuilder};
use boxrs::filter::observer::MultiDigest;
use boxrs::io::{MemorySink, OwnedMemorySource, SeekableReadSource, Source, END_OF_STREAM};
use boxrs::{Archive, ArchiveReadHandle, PackOptions};

fn drain(mut source: Box<dyn Source + '_>) -> Vec<u8> {
    let mut out = Vec::new();
    let mut buf = [0u8; 256];
    loop {
        let n = source.read(&mut buf).unwrap();
        if n == END_OF_STREAM {
            break;
        }
        out.extend_from_slice(&buf[..n]);
    }
    out
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Small deterministic PRNG so fixture data varies without pulling in `rand`.
fn pseudo_random_bytes(len: usize, seed: u64) -> Vec<u8> {
    let mut state = seed | 1;
    let mut out = Vec::with_capacity(len);
    for _ in 0..len {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        out.push((state & 0xff) as u8);
    }
    out
}

#[test]
fn scenario_1_no_filters_digest_and_round_trip() {
    let plain = b"The quick brown fox jumps over the lazy dog".to_vec();
    let mut archive = Archive::of_single_entry(
        "hello.txt",
        Box::new(OwnedMemorySource::new(plain.clone())),
        FilterChain::new(Vec::new()),
    );
    let mut sink = MemorySink::new();
    archive.write(&mut sink).unwrap();

    assert_eq!(archive.entries[0].digest.crc32, 0x414f_a339);
    assert_eq!(hex(&archive.entries[0].digest.md5), "9e107d9d372bb6826bd81d3542a419d6");

    let mut cursor = SeekableReadSource::new(Cursor::new(sink.buf)).unwrap();
    let archive2 = Archive::read(&mut cursor).unwrap();
    let mut handle = ArchiveReadHandle::new(&mut cursor, &archive2);
    assert_eq!(drain(handle.source(0, true).unwrap()), plain);
}

#[test]
fn scenario_2_deflate_round_trip_and_shrinks() {
    let plain = b"The quick brown fox jumps over the lazy dog".repeat(8);
    let filters = FilterChain::new(vec![Box::new(DeflateBuilder::new(6))]);
    let mut archive = Archive::of_single_entry("hello.txt", Box::new(OwnedMemorySource::new(plain.clone())), filters);
    let mut sink = MemorySink::new();
    archive.write(&mut sink).unwrap();

    assert!(archive.entries[0].compressed_size < plain.len() as u64);

    let mut cursor = SeekableReadSource::new(Cursor::new(sink.buf)).unwrap();
    let archive2 = Archive::read(&mut cursor).unwrap();
    let mut handle = ArchiveReadHandle::new(&mut cursor, &archive2);
    assert_eq!(drain(handle.source(0, true).unwrap()), plain);
}

#[test]
fn scenario_3_xor_round_trip_and_ciphertext_shape() {
    let plain = b"The quick brown fox jumps over the lazy dog".to_vec();
    let key = b"secret".to_vec();
    let filters = FilterChain::new(vec![Box::new(XorBuilder::new(key.clone()))]);
    let mut archive = Archive::of_single_entry("hello.txt", Box::new(OwnedMemorySource::new(plain.clone())), filters);
    let mut sink = MemorySink::new();
    archive.write(&mut sink).unwrap();

    let expected_cipher: Vec<u8> = plain
        .iter()
        .enumerate()
        .map(|(i, b)| b ^ key[i % key.len()])
        .collect();
    let stream_offset = archive.streams[0].offset as usize;
    let stream_len = archive.streams[0].length as usize;
    assert_eq!(&sink.buf[stream_offset..stream_offset + stream_len], expected_cipher.as_slice());

    let mut cursor = SeekableReadSource::new(Cursor::new(sink.buf)).unwrap();
    let archive2 = Archive::read(&mut cursor).unwrap();
    let mut handle = ArchiveReadHandle::new(&mut cursor, &archive2);
    assert_eq!(drain(handle.source(0, true).unwrap()), plain);
}

#[test]
fn scenario_4_lzma_solid_stream_nonseekable_random_access() {
    let entries: Vec<Vec<u8>> = (0..3).map(|i| pseudo_random_bytes(64 * 1024, 42 + i)).collect();
    let pending_entries = entries
        .iter()
        .enumerate()
        .map(|(i, data)| PendingEntry::new(format!("part{i}.bin"), Box::new(OwnedMemorySource::new(data.clone())), FilterChain::new(Vec::new())))
        .collect();
    let stream_filters = FilterChain::new(vec![Box::new(LzmaBuilder::new(6))]);
    let mut archive = Archive::of_data(vec![PendingStream::new(pending_entries, stream_filters)]);
    let mut sink = MemorySink::new();
    archive.write(&mut sink).unwrap();

    let total_original: u64 = archive.entries.iter().map(|e| e.original_size).sum();
    assert!(total_original <= 3 * 64 * 1024);
    assert!(!archive.streams[0].seekable);

    let mut cursor = SeekableReadSource::new(Cursor::new(sink.buf)).unwrap();
    let archive2 = Archive::read(&mut cursor).unwrap();
    assert!(!archive2.streams[0].seekable);
    let mut handle = ArchiveReadHandle::new(&mut cursor, &archive2);
    assert_eq!(drain(handle.source(1, true).unwrap()), entries[1]);
}

#[test]
fn scenario_5_diff_filter_against_reference() {
    let reference = pseudo_random_bytes(8192, 7);
    let mut target = reference.clone();
    let diff_region = pseudo_random_bytes(64, 99);
    target[1234..1234 + 64].copy_from_slice(&diff_region);

    let mut digester = MultiDigest::new();
    digester.observe(&reference);
    let reference_digest = digester.finalize();

    let diff_builder = DiffBuilder::new(Box::new(OwnedMemorySource::new(reference.clone())), 0, reference_digest, 4096, 4096);
    let entry_filters = FilterChain::new(vec![Box::new(diff_builder)]);

    let streams = vec![
        PendingStream::new(
            vec![PendingEntry::new(
                "reference.bin",
                Box::new(OwnedMemorySource::new(reference.clone())),
                FilterChain::new(Vec::new()),
            )],
            FilterChain::new(Vec::new()),
        ),
        PendingStream::new(
            vec![PendingEntry::new("target.bin", Box::new(OwnedMemorySource::new(target.clone())), entry_filters)],
            FilterChain::new(Vec::new()),
        ),
    ];
    let mut archive = Archive::of_data(streams);
    let mut sink = MemorySink::new();
    archive.write(&mut sink).unwrap();

    assert!(archive.entries[1].compressed_size < archive.entries[1].original_size);

    let mut cursor = SeekableReadSource::new(Cursor::new(sink.buf)).unwrap();
    let archive2 = Archive::read(&mut cursor).unwrap();
    let mut handle = ArchiveReadHandle::new(&mut cursor, &archive2);
    assert_eq!(drain(handle.source(1, true).unwrap()), target);
}

#[test]
fn scenario_6_integrity_checksum_detects_tampering() {
    let plain = b"integrity checksum coverage".to_vec();
    let mut archive = Archive::of_single_entry("hello.txt", Box::new(OwnedMemorySource::new(plain.clone())), FilterChain::new(Vec::new()))
        .with_integrity_checksum(true);
    let mut sink = MemorySink::new();
    archive.write(&mut sink).unwrap();

    let mut tampered = sink.buf.clone();
    let last = tampered.len() - 1;
    tampered[last] ^= 0xff;

    let mut cursor = SeekableReadSource::new(Cursor::new(tampered)).unwrap();
    let archive2 = Archive::read(&mut cursor).unwrap();
    assert!(!archive2.is_valid_global_checksum());
    assert!(Archive::verify_integrity(&mut cursor).is_err());
}

fn assert_stream_codec_compressed_size_matches_length(label: &str, stream_filters: impl Fn() -> FilterChain) {
    let plain = b"The quick brown fox jumps over the lazy dog".repeat(64);
    let mut archive = Archive::of_one_entry_per_stream(
        vec![("solo.bin".to_string(), Box::new(OwnedMemorySource::new(plain.clone())) as Box<dyn Source>)],
        stream_filters,
    );
    let mut sink = MemorySink::new();
    archive.write(&mut sink).unwrap();

    assert!(archive.streams[0].seekable, "{label}: single-entry stream must be seekable");
    assert_eq!(
        archive.streams[0].length,
        archive.entries[0].compressed_size,
        "{label}: stream.length must equal the sole entry's compressed_size"
    );

    let mut cursor = SeekableReadSource::new(Cursor::new(sink.buf)).unwrap();
    let archive2 = Archive::read(&mut cursor).unwrap();
    let mut handle = ArchiveReadHandle::new(&mut cursor, &archive2);
    assert_eq!(drain(handle.source(0, true).unwrap()), plain, "{label}: seekable round trip must recover the original bytes");
}

#[test]
fn stream_level_deflate_compressed_size_matches_stream_length() {
    let opts = PackOptions::default();
    assert_stream_codec_compressed_size_matches_length("deflate", || FilterChain::new(vec![opts.deflate_builder()]));
}

#[test]
fn stream_level_lzma_compressed_size_matches_stream_length() {
    let opts = PackOptions::default();
    assert_stream_codec_compressed_size_matches_length("lzma", || FilterChain::new(vec![opts.lzma_builder()]));
}

#[test]
fn on_disk_round_trip_via_tempfile() {
    use std::fs::File;
    use tempfile::NamedTempFile;

    let plain = b"written and read back through an actual file handle".to_vec();
    let mut archive = Archive::of_single_entry("hello.txt", Box::new(OwnedMemorySource::new(plain.clone())), FilterChain::new(Vec::new()));

    let temp_file = NamedTempFile::new().unwrap();
    {
        let mut sink = MemorySink::new();
        archive.write(&mut sink).unwrap();
        std::fs::write(temp_file.path(), &sink.buf).unwrap();
    }

    let file = File::open(temp_file.path()).unwrap();
    let mut source = SeekableReadSource::new(file).unwrap();
    let archive2 = Archive::read(&mut source).unwrap();
    assert_eq!(archive2.entries.len(), 1);
    assert_eq!(archive2.entries[0].name, "hello.txt");

    let mut handle = ArchiveReadHandle::new(&mut source, &archive2);
    assert_eq!(drain(handle.source(0, true).unwrap()), plain);
}
