//! Tile addressing and triplet discovery
//!
//! Tiles are named `{base}_{y}_{x}_{kind}.{ext}`. The address (base, y, x)
//! is what re-associates a before tile with its after and mask siblings.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::utils::error::{Result, SentinelError};

/// Role of a tile within a sample triplet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TileKind {
    Before,
    After,
    Mask,
}

impl TileKind {
    pub const ALL: [TileKind; 3] = [TileKind::Before, TileKind::After, TileKind::Mask];

    pub fn suffix(&self) -> &'static str {
        match self {
            TileKind::Before => "before",
            TileKind::After => "after",
            TileKind::Mask => "mask",
        }
    }
}

/// Unique identity of a sample: source name plus tile origin
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TileAddress {
    pub source: String,
    pub y: usize,
    pub x: usize,
}

impl TileAddress {
    pub fn new(source: impl Into<String>, y: usize, x: usize) -> Self {
        Self {
            source: source.into(),
            y,
            x,
        }
    }

    /// `{base}_{y}_{x}_{kind}.{ext}`
    pub fn file_name(&self, kind: TileKind, ext: &str) -> String {
        format!("{}_{}_{}_{}.{}", self.source, self.y, self.x, kind.suffix(), ext)
    }

    /// Parse a tile file name back into its address and kind.
    ///
    /// The base may itself contain underscores; only the last three
    /// components are positional.
    pub fn parse(file_name: &str) -> Option<(TileAddress, TileKind)> {
        let stem = Path::new(file_name).file_stem()?.to_str()?;

        let (rest, kind) = TileKind::ALL.iter().find_map(|k| {
            stem.strip_suffix(k.suffix())
                .and_then(|r| r.strip_suffix('_'))
                .map(|r| (r, *k))
        })?;

        let mut parts = rest.rsplitn(3, '_');
        let x = parts.next()?.parse().ok()?;
        let y = parts.next()?.parse().ok()?;
        let source = parts.next()?;
        if source.is_empty() {
            return None;
        }

        Some((TileAddress::new(source, y, x), kind))
    }
}

impl fmt::Display for TileAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@({}, {})", self.source, self.y, self.x)
    }
}

/// Paths of one complete before/after/mask sample
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileTriplet {
    pub address: TileAddress,
    pub before: PathBuf,
    pub after: PathBuf,
    pub mask: PathBuf,
}

/// Result of scanning a tile directory
#[derive(Debug, Default)]
pub struct TripletScan {
    /// Complete triplets, sorted by address
    pub triplets: Vec<TileTriplet>,
    /// One DataError per incomplete sample
    pub incomplete: Vec<SentinelError>,
}

/// Pair every `_before` tile in `dir` with its `_after` and `_mask` siblings.
///
/// A missing sibling is a DataError for that sample only; it is logged and
/// reported in [`TripletScan::incomplete`]. So is a sample with two files of
/// the same kind (e.g. `_before.png` and `_before.tif`), since either could
/// be the intended one.
pub fn discover_triplets(dir: &Path) -> Result<TripletScan> {
    let mut found: BTreeMap<TileAddress, [Option<PathBuf>; 3]> = BTreeMap::new();
    let mut ambiguous: BTreeMap<TileAddress, BTreeSet<PathBuf>> = BTreeMap::new();

    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Some((address, kind)) = TileAddress::parse(name) else {
            debug!("Ignoring non-tile file {}", path.display());
            continue;
        };
        let slot = match kind {
            TileKind::Before => 0,
            TileKind::After => 1,
            TileKind::Mask => 2,
        };
        let entry = &mut found.entry(address.clone()).or_default()[slot];
        match entry {
            Some(existing) => {
                warn!(
                    "Tile {} has two {} files: {} and {}",
                    address,
                    kind.suffix(),
                    existing.display(),
                    path.display()
                );
                let paths = ambiguous.entry(address).or_default();
                paths.insert(existing.clone());
                paths.insert(path);
            }
            None => *entry = Some(path),
        }
    }

    let mut scan = TripletScan::default();
    for (address, [before, after, mask]) in found {
        if let Some(paths) = ambiguous.remove(&address) {
            let names: Vec<String> = paths.iter().map(|p| p.display().to_string()).collect();
            let err = SentinelError::Data(format!(
                "tile {} is ambiguous between {}",
                address,
                names.join(", ")
            ));
            warn!("Skipping sample: {}", err);
            scan.incomplete.push(err);
            continue;
        }
        match (before, after, mask) {
            (Some(before), Some(after), Some(mask)) => scan.triplets.push(TileTriplet {
                address,
                before,
                after,
                mask,
            }),
            (before, after, mask) => {
                let missing: Vec<&str> = [(&before, "before"), (&after, "after"), (&mask, "mask")]
                    .into_iter()
                    .filter(|(p, _)| p.is_none())
                    .map(|(_, k)| k)
                    .collect();
                let err = SentinelError::Data(format!(
                    "tile {} is missing its {} file(s)",
                    address,
                    missing.join(", ")
                ));
                warn!("Skipping sample: {}", err);
                scan.incomplete.push(err);
            }
        }
    }

    debug!(
        "Discovered {} triplets ({} incomplete) in {}",
        scan.triplets.len(),
        scan.incomplete.len(),
        dir.display()
    );
    Ok(scan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_file_name_format() {
        let a = TileAddress::new("T33UUP_2023", 256, 512);
        assert_eq!(a.file_name(TileKind::Before, "png"), "T33UUP_2023_256_512_before.png");
        assert_eq!(a.file_name(TileKind::Mask, "tif"), "T33UUP_2023_256_512_mask.tif");
    }

    #[test]
    fn test_parse_inverts_file_name() {
        let a = TileAddress::new("scene_a_b", 0, 768);
        for kind in TileKind::ALL {
            let name = a.file_name(kind, "png");
            assert_eq!(TileAddress::parse(&name), Some((a.clone(), kind)));
        }
    }

    #[test]
    fn test_parse_rejects_foreign_names() {
        assert_eq!(TileAddress::parse("readme.txt"), None);
        assert_eq!(TileAddress::parse("scene_x_0_before.png"), None);
        assert_eq!(TileAddress::parse("_0_0_after.png"), None);
        assert_eq!(TileAddress::parse("scene_0_0_diff.png"), None);
    }

    #[test]
    fn test_discover_triplets_reports_missing_sibling() {
        let dir = TempDir::new().unwrap();
        let complete = TileAddress::new("s", 0, 0);
        let partial = TileAddress::new("s", 0, 256);
        for kind in TileKind::ALL {
            std::fs::write(dir.path().join(complete.file_name(kind, "png")), b"").unwrap();
        }
        std::fs::write(dir.path().join(partial.file_name(TileKind::Before, "png")), b"").unwrap();
        std::fs::write(dir.path().join(partial.file_name(TileKind::After, "png")), b"").unwrap();
        std::fs::write(dir.path().join("notes.md"), b"").unwrap();

        let scan = discover_triplets(dir.path()).unwrap();
        assert_eq!(scan.triplets.len(), 1);
        assert_eq!(scan.triplets[0].address, complete);
        assert_eq!(scan.incomplete.len(), 1);
        assert!(scan.incomplete[0].to_string().contains("mask"));
    }

    #[test]
    fn test_discover_triplets_rejects_duplicate_extension() {
        let dir = TempDir::new().unwrap();
        let clean = TileAddress::new("s", 0, 0);
        let doubled = TileAddress::new("s", 256, 0);
        for kind in TileKind::ALL {
            std::fs::write(dir.path().join(clean.file_name(kind, "png")), b"").unwrap();
            std::fs::write(dir.path().join(doubled.file_name(kind, "png")), b"").unwrap();
        }
        std::fs::write(dir.path().join(doubled.file_name(TileKind::Before, "tif")), b"").unwrap();

        let scan = discover_triplets(dir.path()).unwrap();
        assert_eq!(scan.triplets.len(), 1);
        assert_eq!(scan.triplets[0].address, clean);
        assert_eq!(scan.incomplete.len(), 1);
        let message = scan.incomplete[0].to_string();
        assert!(message.contains("ambiguous"));
        assert!(message.contains("s_256_0_before.png"));
        assert!(message.contains("s_256_0_before.tif"));
    }
}
