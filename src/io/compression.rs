//! Transparent compression for row sources and partition sinks.
//!
//! The codec is resolved once, when a source or sink is constructed, into the
//! closed [`Compression`] enum:
//!
//! - **Extension first**: `.gz`/`.gzip`, `.zst`/`.zstd`, `.bz2`/`.bzip2`, `.xz`.
//! - **Magic bytes** as a fallback when reading a file with an unrecognised
//!   extension.
//!
//! Each codec sits behind its own feature (`compression-gzip`, `compression-zstd`,
//! `compression-bzip2`, `compression-xz`). A path that names a disabled codec
//! resolves normally but fails on use with an error naming the feature.
//!
//! Sinks compress a fully serialized chunk in memory ([`Compression::compress`])
//! so encoder trailers are written and checked explicitly instead of on drop.

use anyhow::{Context, Result, bail};
use std::fs::File;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::Path;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Compression {
    #[default]
    None,
    Gzip,
    Zstd,
    Bzip2,
    Xz,
}

const MAGIC: &[(Compression, &[u8])] = &[
    (Compression::Gzip, &[0x1f, 0x8b]),
    (Compression::Zstd, &[0x28, 0xb5, 0x2f, 0xfd]),
    (Compression::Bzip2, &[0x42, 0x5a, 0x68]),
    (Compression::Xz, &[0xfd, 0x37, 0x7a, 0x58, 0x5a, 0x00]),
];

impl Compression {
    /// Resolve from the path's final extension. Case-insensitive.
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        let ext = path
            .as_ref()
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase());
        match ext.as_deref() {
            Some("gz" | "gzip") => Self::Gzip,
            Some("zst" | "zstd") => Self::Zstd,
            Some("bz2" | "bzip2") => Self::Bzip2,
            Some("xz") => Self::Xz,
            _ => Self::None,
        }
    }

    /// Sniff the leading bytes of a buffered stream without consuming them.
    pub fn sniff<R: BufRead>(reader: &mut R) -> Result<Self> {
        let buf = reader.fill_buf().context("peek for compression magic")?;
        Ok(MAGIC
            .iter()
            .find(|(_, magic)| buf.starts_with(magic))
            .map_or(Self::None, |(c, _)| *c))
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Gzip => "gzip",
            Self::Zstd => "zstd",
            Self::Bzip2 => "bzip2",
            Self::Xz => "xz",
        }
    }

    /// Strip this codec's extension from a file name (`rows.csv.gz` → `rows.csv`).
    #[must_use]
    pub fn inner_path(self, path: &Path) -> std::path::PathBuf {
        match self {
            Self::None => path.to_path_buf(),
            _ => path.with_extension(""),
        }
    }

    /// Wrap `reader` with the matching decoder.
    ///
    /// # Errors
    /// The codec's feature is disabled or the decoder cannot start.
    pub fn decoder<'a, R: Read + 'a>(self, reader: R) -> Result<Box<dyn Read + 'a>> {
        let decoded: Box<dyn Read + 'a> = match self {
            Self::None => Box::new(reader),
            #[cfg(feature = "compression-gzip")]
            Self::Gzip => Box::new(flate2::read::MultiGzDecoder::new(reader)),
            #[cfg(feature = "compression-zstd")]
            Self::Zstd => Box::new(zstd::stream::read::Decoder::new(reader).context("start zstd decoder")?),
            #[cfg(feature = "compression-bzip2")]
            Self::Bzip2 => Box::new(bzip2::read::MultiBzDecoder::new(reader)),
            #[cfg(feature = "compression-xz")]
            Self::Xz => Box::new(xz2::read::XzDecoder::new_multi_decoder(reader)),
            #[allow(unreachable_patterns)]
            other => bail!("{} input needs the compression-{} feature", other.name(), other.name()),
        };
        Ok(decoded)
    }

    /// Compress a complete buffer, finishing the stream explicitly.
    ///
    /// # Errors
    /// The codec's feature is disabled or encoding fails.
    pub fn compress(self, raw: &[u8]) -> Result<Vec<u8>> {
        match self {
            Self::None => Ok(raw.to_vec()),
            #[cfg(feature = "compression-gzip")]
            Self::Gzip => {
                let mut enc = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
                enc.write_all(raw)?;
                enc.finish().context("finish gzip stream")
            }
            #[cfg(feature = "compression-zstd")]
            Self::Zstd => zstd::stream::encode_all(raw, 3).context("zstd encode"),
            #[cfg(feature = "compression-bzip2")]
            Self::Bzip2 => {
                let mut enc = bzip2::write::BzEncoder::new(Vec::new(), bzip2::Compression::default());
                enc.write_all(raw)?;
                enc.finish().context("finish bzip2 stream")
            }
            #[cfg(feature = "compression-xz")]
            Self::Xz => {
                let mut enc = xz2::write::XzEncoder::new(Vec::new(), 6);
                enc.write_all(raw)?;
                enc.finish().context("finish xz stream")
            }
            #[allow(unreachable_patterns)]
            other => bail!("{} output needs the compression-{} feature", other.name(), other.name()),
        }
    }
}

/// Open `path` for reading, decompressing by extension or, failing that, by
/// magic bytes.
///
/// # Errors
/// The file cannot be opened or its codec is unavailable.
pub fn open_decoded(path: impl AsRef<Path>) -> Result<Box<dyn Read>> {
    let path = path.as_ref();
    let f = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut reader = BufReader::new(f);
    let codec = match Compression::from_path(path) {
        Compression::None => Compression::sniff(&mut reader)
            .with_context(|| format!("sniff {}", path.display()))?,
        c => c,
    };
    codec
        .decoder(reader)
        .with_context(|| format!("setup decompression for {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn resolves_from_extension() {
        assert_eq!(Compression::from_path("a/b.csv.GZ"), Compression::Gzip);
        assert_eq!(Compression::from_path("b.jsonl.zst"), Compression::Zstd);
        assert_eq!(Compression::from_path("b.csv.bz2"), Compression::Bzip2);
        assert_eq!(Compression::from_path("b.csv.xz"), Compression::Xz);
        assert_eq!(Compression::from_path("b.csv"), Compression::None);
        assert_eq!(
            Compression::Gzip.inner_path(Path::new("x/rows.csv.gz")),
            PathBuf::from("x/rows.csv")
        );
    }

    #[cfg(feature = "compression-gzip")]
    #[test]
    fn gzip_roundtrip_and_sniff() -> Result<()> {
        let packed = Compression::Gzip.compress(b"id,name\n1,a\n")?;
        let mut r = BufReader::new(packed.as_slice());
        assert_eq!(Compression::sniff(&mut r)?, Compression::Gzip);
        let mut out = String::new();
        Compression::Gzip.decoder(r)?.read_to_string(&mut out)?;
        assert_eq!(out, "id,name\n1,a\n");
        Ok(())
    }

    #[cfg(feature = "compression-zstd")]
    #[test]
    fn zstd_output_is_deterministic() -> Result<()> {
        let a = Compression::Zstd.compress(b"same bytes, same output")?;
        let b = Compression::Zstd.compress(b"same bytes, same output")?;
        assert_eq!(a, b);
        Ok(())
    }

    #[test]
    fn open_decoded_sniffs_unlabelled_files() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("plain.txt");
        std::fs::write(&path, "hello")?;
        let mut s = String::new();
        open_decoded(&path)?.read_to_string(&mut s)?;
        assert_eq!(s, "hello");
        Ok(())
    }
}
