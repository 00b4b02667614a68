//! Filter builders, the process-wide registry, and the ordered chain that
//! composes them into a reversible pipeline.

use std::collections::HashMap;
use std::sync::OnceLock;

use crate::archive::model::{DigestInfo, FilterRecordHeader};
use crate::buffer::OnDiskStruct;
use crate::error::FilterError;
use crate::filter::deflate::{DeflateProcessor, InflateProcessor};
use crate::filter::diff::{DiffDecodeSource, DiffEncodeSource};
use crate::filter::lzma::{LzmaDecodeProcessor, LzmaEncodeProcessor};
use crate::filter::observer::{MultiDigest, Observer};
use crate::filter::xor::XorProcessor;
use crate::filter::BufferedFilterStage;
use crate::io::{SeekableSource, Source, END_OF_STREAM};

const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// Shared state for one archive read/write operation, threaded through
/// every builder's `setup`/`teardown`. Caches a reference source's digest
/// by an identity the caller assigns (its entry index), so several filters
/// pointing at the same reference do not recompute it.
#[derive(Default)]
pub struct Env {
    digest_cache: HashMap<u64, DigestInfo>,
}

impl Env {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cached_digest(&self, reference_id: u64) -> Option<DigestInfo> {
        self.digest_cache.get(&reference_id).copied()
    }

    pub fn cache_digest(&mut self, reference_id: u64, digest: DigestInfo) {
        self.digest_cache.insert(reference_id, digest);
    }
}

/// One stage in a filter chain: a serializable factory that can produce a
/// forward (`apply`) and reverse (`unapply`) stream transform.
pub trait FilterBuilder {
    fn identifier(&self) -> u32;
    fn mnemonic(&self) -> &'static str;
    fn payload(&self) -> Vec<u8>;
    fn apply<'a>(&mut self, source: Box<dyn Source + 'a>)
        -> Result<Box<dyn Source + 'a>, FilterError>;
    fn unapply<'a>(
        &mut self,
        source: Box<dyn Source + 'a>,
    ) -> Result<Box<dyn Source + 'a>, FilterError>;
    fn setup(&mut self, _env: &mut Env) {}
    fn teardown(&mut self, _env: &mut Env) {}

    /// `Some(digest)` iff this builder needs a reference source located by
    /// matching another entry's digest before `apply`/`unapply` can run
    /// (only the diff filter; every other builder is self-contained).
    fn needs_reference_digest(&self) -> Option<DigestInfo> {
        None
    }

    /// Supplies the reference source a prior `needs_reference_digest` call
    /// asked for. No-op for builders that never returned `Some`.
    fn provide_reference(&mut self, _reference: Box<dyn SeekableSource>) {}
}

type Generator = fn(&[u8]) -> Result<Box<dyn FilterBuilder>, FilterError>;

fn build_registry() -> HashMap<u32, Generator> {
    let mut map: HashMap<u32, Generator> = HashMap::new();
    map.insert(XorBuilder::IDENTIFIER, XorBuilder::from_payload);
    map.insert(DeflateBuilder::IDENTIFIER, DeflateBuilder::from_payload);
    map.insert(LzmaBuilder::IDENTIFIER, LzmaBuilder::from_payload);
    map.insert(DiffBuilder::IDENTIFIER, DiffBuilder::from_payload);
    map
}

fn registry() -> &'static HashMap<u32, Generator> {
    static REGISTRY: OnceLock<HashMap<u32, Generator>> = OnceLock::new();
    REGISTRY.get_or_init(build_registry)
}

fn build_from_registry(identifier: u32, payload: &[u8]) -> Result<Box<dyn FilterBuilder>, FilterError> {
    let generator = registry()
        .get(&identifier)
        .ok_or(FilterError::UnknownIdentifier(identifier))?;
    generator(payload)
}

/// An ordered list of [`FilterBuilder`]s, applied forward or in reverse.
pub struct FilterChain {
    builders: Vec<Box<dyn FilterBuilder>>,
}

impl FilterChain {
    pub fn new(builders: Vec<Box<dyn FilterBuilder>>) -> Self {
        Self { builders }
    }

    pub fn is_empty(&self) -> bool {
        self.builders.is_empty()
    }

    pub fn builders_mut(&mut self) -> &mut [Box<dyn FilterBuilder>] {
        &mut self.builders
    }

    pub fn apply<'a>(
        &mut self,
        mut source: Box<dyn Source + 'a>,
    ) -> Result<Box<dyn Source + 'a>, FilterError> {
        for builder in self.builders.iter_mut() {
            source = builder.apply(source)?;
        }
        Ok(source)
    }

    pub fn unapply<'a>(
        &mut self,
        mut source: Box<dyn Source + 'a>,
    ) -> Result<Box<dyn Source + 'a>, FilterError> {
        for builder in self.builders.iter_mut().rev() {
            source = builder.unapply(source)?;
        }
        Ok(source)
    }

    pub fn setup(&mut self, env: &mut Env) {
        for builder in self.builders.iter_mut() {
            builder.setup(env);
        }
    }

    pub fn teardown(&mut self, env: &mut Env) {
        for builder in self.builders.iter_mut() {
            builder.teardown(env);
        }
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::new();
        let last = self.builders.len().saturating_sub(1);
        for (i, builder) in self.builders.iter().enumerate() {
            let payload = builder.payload();
            let header = FilterRecordHeader {
                identifier: builder.identifier(),
                record_length: (FilterRecordHeader::BYTE_LEN + payload.len()) as u64,
                has_next: u32::from(i != last),
            };
            out.extend_from_slice(&header.to_bytes());
            out.extend_from_slice(&payload);
        }
        out
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self, FilterError> {
        let mut builders = Vec::new();
        if bytes.is_empty() {
            return Ok(Self { builders });
        }
        let mut pos = 0usize;
        loop {
            if pos + FilterRecordHeader::BYTE_LEN > bytes.len() {
                return Err(FilterError::TruncatedRecord {
                    claimed: FilterRecordHeader::BYTE_LEN as u64,
                    available: (bytes.len() - pos) as u64,
                });
            }
            let header =
                FilterRecordHeader::from_bytes(&bytes[pos..pos + FilterRecordHeader::BYTE_LEN]);
            let total = header.record_length as usize;
            if total < FilterRecordHeader::BYTE_LEN || pos + total > bytes.len() {
                return Err(FilterError::TruncatedRecord {
                    claimed: header.record_length,
                    available: (bytes.len() - pos) as u64,
                });
            }
            let param_start = pos + FilterRecordHeader::BYTE_LEN;
            let params = &bytes[param_start..pos + total];
            builders.push(build_from_registry(header.identifier, params)?);
            let has_next = header.has_next != 0;
            pos += total;
            if !has_next {
                break;
            }
        }
        Ok(Self { builders })
    }
}

/// Repeating-key XOR: symmetric, `apply` and `unapply` are identical.
pub struct XorBuilder {
    key: Vec<u8>,
}

impl XorBuilder {
    pub const IDENTIFIER: u32 = 1;

    pub fn new(key: Vec<u8>) -> Self {
        Self { key }
    }

    fn from_payload(bytes: &[u8]) -> Result<Box<dyn FilterBuilder>, FilterError> {
        if bytes.len() < 4 {
            return Err(FilterError::TruncatedRecord {
                claimed: 4,
                available: bytes.len() as u64,
            });
        }
        let key_length = u32::from_le_bytes(bytes[0..4].try_into().unwrap()) as usize;
        if key_length == 0 {
            return Err(FilterError::EmptyXorKey);
        }
        if bytes.len() < 4 + key_length {
            return Err(FilterError::TruncatedRecord {
                claimed: (4 + key_length) as u64,
                available: bytes.len() as u64,
            });
        }
        Ok(Box::new(Self::new(bytes[4..4 + key_length].to_vec())))
    }
}

impl FilterBuilder for XorBuilder {
    fn identifier(&self) -> u32 {
        Self::IDENTIFIER
    }

    fn mnemonic(&self) -> &'static str {
        "xor"
    }

    fn payload(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + self.key.len());
        out.extend_from_slice(&(self.key.len() as u32).to_le_bytes());
        out.extend_from_slice(&self.key);
        out
    }

    fn apply<'a>(
        &mut self,
        source: Box<dyn Source + 'a>,
    ) -> Result<Box<dyn Source + 'a>, FilterError> {
        Ok(Box::new(BufferedFilterStage::new(
            source,
            XorProcessor::new(self.key.clone()),
            DEFAULT_BUFFER_SIZE,
        )))
    }

    fn unapply<'a>(
        &mut self,
        source: Box<dyn Source + 'a>,
    ) -> Result<Box<dyn Source + 'a>, FilterError> {
        self.apply(source)
    }
}

/// DEFLATE: `apply` compresses, `unapply` inflates.
pub struct DeflateBuilder {
    level: u32,
}

impl DeflateBuilder {
    pub const IDENTIFIER: u32 = 1024;

    pub fn new(level: u32) -> Self {
        Self { level }
    }

    fn from_payload(_bytes: &[u8]) -> Result<Box<dyn FilterBuilder>, FilterError> {
        Ok(Box::new(Self::new(6)))
    }
}

impl FilterBuilder for DeflateBuilder {
    fn identifier(&self) -> u32 {
        Self::IDENTIFIER
    }

    fn mnemonic(&self) -> &'static str {
        "deflate"
    }

    fn payload(&self) -> Vec<u8> {
        Vec::new()
    }

    fn apply<'a>(
        &mut self,
        source: Box<dyn Source + 'a>,
    ) -> Result<Box<dyn Source + 'a>, FilterError> {
        Ok(Box::new(BufferedFilterStage::new(
            source,
            DeflateProcessor::new(self.level),
            DEFAULT_BUFFER_SIZE,
        )))
    }

    fn unapply<'a>(
        &mut self,
        source: Box<dyn Source + 'a>,
    ) -> Result<Box<dyn Source + 'a>, FilterError> {
        Ok(Box::new(BufferedFilterStage::new(
            source,
            InflateProcessor::new(),
            DEFAULT_BUFFER_SIZE,
        )))
    }
}

/// LZMA: `apply` encodes (multi-threaded when possible), `unapply` decodes.
pub struct LzmaBuilder {
    preset: u32,
}

impl LzmaBuilder {
    pub const IDENTIFIER: u32 = 1025;

    pub fn new(preset: u32) -> Self {
        Self { preset }
    }

    fn from_payload(_bytes: &[u8]) -> Result<Box<dyn FilterBuilder>, FilterError> {
        Ok(Box::new(Self::new(6)))
    }
}

impl FilterBuilder for LzmaBuilder {
    fn identifier(&self) -> u32 {
        Self::IDENTIFIER
    }

    fn mnemonic(&self) -> &'static str {
        "lzma"
    }

    fn payload(&self) -> Vec<u8> {
        Vec::new()
    }

    fn apply<'a>(
        &mut self,
        source: Box<dyn Source + 'a>,
    ) -> Result<Box<dyn Source + 'a>, FilterError> {
        Ok(Box::new(BufferedFilterStage::new(
            source,
            LzmaEncodeProcessor::new(self.preset)?,
            DEFAULT_BUFFER_SIZE,
        )))
    }

    fn unapply<'a>(
        &mut self,
        source: Box<dyn Source + 'a>,
    ) -> Result<Box<dyn Source + 'a>, FilterError> {
        Ok(Box::new(BufferedFilterStage::new(
            source,
            LzmaDecodeProcessor::new()?,
            DEFAULT_BUFFER_SIZE,
        )))
    }
}

/// The xdelta3-substitute diff filter. Holds its reference source
/// out-of-band: the on-disk payload only carries the reference's digest
/// plus the window/block-size parameters, so a builder deserialized from
/// bytes alone needs [`DiffBuilder::set_reference`] before `apply`/`unapply`.
pub struct DiffBuilder {
    reference_digest: DigestInfo,
    window_size: u64,
    source_block_size: u64,
    reference_id: u64,
    reference: Option<Box<dyn SeekableSource>>,
}

impl DiffBuilder {
    pub const IDENTIFIER: u32 = 2048;

    pub fn new(
        reference: Box<dyn SeekableSource>,
        reference_id: u64,
        reference_digest: DigestInfo,
        window_size: u64,
        source_block_size: u64,
    ) -> Self {
        Self {
            reference_digest,
            window_size,
            source_block_size,
            reference_id,
            reference: Some(reference),
        }
    }

    pub fn set_reference(&mut self, reference: Box<dyn SeekableSource>) {
        self.reference = Some(reference);
    }

    fn from_payload(bytes: &[u8]) -> Result<Box<dyn FilterBuilder>, FilterError> {
        let needed = DigestInfo::BYTE_LEN + 16;
        if bytes.len() < needed {
            return Err(FilterError::TruncatedRecord {
                claimed: needed as u64,
                available: bytes.len() as u64,
            });
        }
        let reference_digest = DigestInfo::from_bytes(&bytes[..DigestInfo::BYTE_LEN]);
        let window_size = u64::from_le_bytes(
            bytes[DigestInfo::BYTE_LEN..DigestInfo::BYTE_LEN + 8]
                .try_into()
                .unwrap(),
        );
        let source_block_size = u64::from_le_bytes(
            bytes[DigestInfo::BYTE_LEN + 8..DigestInfo::BYTE_LEN + 16]
                .try_into()
                .unwrap(),
        );
        Ok(Box::new(Self {
            reference_digest,
            window_size,
            source_block_size,
            reference_id: 0,
            reference: None,
        }))
    }
}

impl FilterBuilder for DiffBuilder {
    fn identifier(&self) -> u32 {
        Self::IDENTIFIER
    }

    fn mnemonic(&self) -> &'static str {
        "diff"
    }

    fn payload(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(DigestInfo::BYTE_LEN + 16);
        out.extend_from_slice(&self.reference_digest.to_bytes());
        out.extend_from_slice(&self.window_size.to_le_bytes());
        out.extend_from_slice(&self.source_block_size.to_le_bytes());
        out
    }

    fn apply<'a>(
        &mut self,
        source: Box<dyn Source + 'a>,
    ) -> Result<Box<dyn Source + 'a>, FilterError> {
        let reference = self.reference.take().ok_or(FilterError::MissingReference)?;
        Ok(Box::new(DiffEncodeSource::new(
            reference,
            source,
            self.source_block_size as usize,
        )?))
    }

    fn unapply<'a>(
        &mut self,
        source: Box<dyn Source + 'a>,
    ) -> Result<Box<dyn Source + 'a>, FilterError> {
        let reference = self.reference.take().ok_or(FilterError::MissingReference)?;
        Ok(Box::new(DiffDecodeSource::new(reference, source)?))
    }

    fn setup(&mut self, env: &mut Env) {
        if env.cached_digest(self.reference_id).is_some() {
            return;
        }
        if let Some(reference) = self.reference.as_mut() {
            let mut digester = MultiDigest::new();
            let mut buf = [0u8; 8192];
            loop {
                let n = reference.read(&mut buf).expect("reference source read");
                if n == END_OF_STREAM {
                    break;
                }
                digester.observe(&buf[..n]);
            }
            let digest = digester.finalize();
            reference.seek_to(0).expect("reference source rewind");
            env.cache_digest(self.reference_id, digest);
        }
    }

    fn needs_reference_digest(&self) -> Option<DigestInfo> {
        if self.reference.is_some() {
            None
        } else {
            Some(self.reference_digest)
        }
    }

    fn provide_reference(&mut self, reference: Box<dyn SeekableSource>) {
        self.set_reference(reference);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{MemorySource, END_OF_STREAM};

    fn drain(mut source: Box<dyn Source>) -> Vec<u8> {
        let mut out = Vec::new();
        let mut buf = [0u8; 32];
        loop {
            let n = source.read(&mut buf).unwrap();
            if n == END_OF_STREAM {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        out
    }

    #[test]
    fn xor_chain_round_trips_and_serializes() {
        let plain = b"chained filter data, chained filter data".to_vec();
        let mut chain = FilterChain::new(vec![Box::new(XorBuilder::new(b"k".to_vec()))]);
        let applied = chain
            .apply(Box::new(MemorySource::new(&plain)))
            .unwrap();
        let cipher = drain(applied);
        assert_ne!(cipher, plain);

        let mut chain2 = FilterChain::deserialize(&chain.serialize()).unwrap();
        let restored = chain2.unapply(Box::new(MemorySource::new(&cipher))).unwrap();
        assert_eq!(drain(restored), plain);
    }

    #[test]
    fn deflate_chain_round_trips() {
        let plain: Vec<u8> = (0..5000u32).map(|i| (i % 17) as u8).collect();
        let mut chain = FilterChain::new(vec![Box::new(DeflateBuilder::new(6))]);
        let compressed = drain(chain.apply(Box::new(MemorySource::new(&plain))).unwrap());
        assert!(compressed.len() < plain.len());

        let mut chain2 = FilterChain::new(vec![Box::new(DeflateBuilder::new(6))]);
        let restored = drain(
            chain2
                .unapply(Box::new(MemorySource::new(&compressed)))
                .unwrap(),
        );
        assert_eq!(restored, plain);
    }

    #[test]
    fn zero_length_xor_key_payload_is_rejected() {
        let chain = FilterChain::new(vec![Box::new(XorBuilder::new(b"k".to_vec()))]);
        let mut bytes = chain.serialize();
        let key_length_offset = FilterRecordHeader::BYTE_LEN;
        bytes[key_length_offset..key_length_offset + 4].copy_from_slice(&0u32.to_le_bytes());

        let err = FilterChain::deserialize(&bytes).unwrap_err();
        assert!(matches!(err, FilterError::EmptyXorKey));
    }

    #[test]
    fn unknown_identifier_is_rejected() {
        let header = FilterRecordHeader {
            identifier: 999_999,
            record_length: FilterRecordHeader::BYTE_LEN as u64,
            has_next: 0,
        };
        let bytes = header.to_bytes();
        let err = FilterChain::deserialize(&bytes).unwrap_err();
        assert!(matches!(err, FilterError::UnknownIdentifier(999_999)));
    }
}
