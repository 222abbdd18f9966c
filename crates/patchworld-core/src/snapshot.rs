//! Byte-stream snapshots of a map and the payload scribe contract.
//!
//! Integers are framed in native byte order; snapshots are an in-process
//! save format, not a wire format for foreign hosts. Patches are written
//! sorted by key so equal maps always serialize to equal bytes.

use crate::field::ItemType;
use crate::map::{Map, MapConfig, MapError};
use crate::patch::{Item, Patch, PatchStore};
use crate::position::{self, Position};
use crate::rng::Lcg64;
use std::any::Any;
use std::io::{self, Read, Write};
use thiserror::Error;

/// Leading bytes of every snapshot.
pub const SNAPSHOT_MAGIC: [u8; 4] = *b"PWLD";
/// Current snapshot layout version.
pub const SNAPSHOT_FORMAT_VERSION: u16 = 1;

/// Caller-supplied context threaded through payload (de)serialization.
///
/// Payload codecs that need external state (string tables, registries)
/// recover their concrete scribe through [`Scribe::as_any_mut`].
pub trait Scribe {
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Scribe for payloads that need no external context.
#[derive(Debug, Default)]
pub struct DefaultScribe;

impl Scribe for DefaultScribe {
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Per-patch payload contract: default construction plus snapshot I/O.
///
/// The core constructs, moves, serializes, and drops payloads; it never
/// inspects them.
pub trait PatchData: Default {
    fn write_to(&self, out: &mut dyn Write, scribe: &mut dyn Scribe) -> io::Result<()>;

    fn read_from(input: &mut dyn Read, scribe: &mut dyn Scribe) -> io::Result<Self>
    where
        Self: Sized;
}

impl PatchData for () {
    fn write_to(&self, _out: &mut dyn Write, _scribe: &mut dyn Scribe) -> io::Result<()> {
        Ok(())
    }

    fn read_from(_input: &mut dyn Read, _scribe: &mut dyn Scribe) -> io::Result<Self> {
        Ok(())
    }
}

/// Errors surfaced while writing or reading snapshots.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("i/o failure: {0}")]
    Io(#[from] io::Error),
    #[error("not a map snapshot")]
    BadMagic,
    #[error("unsupported snapshot version {0}")]
    UnsupportedVersion(u16),
    #[error("corrupt snapshot: {0}")]
    Corrupt(&'static str),
    #[error(transparent)]
    Config(#[from] MapError),
}

fn write_u16(out: &mut dyn Write, value: u16) -> io::Result<()> {
    out.write_all(&value.to_ne_bytes())
}

fn write_u32(out: &mut dyn Write, value: u32) -> io::Result<()> {
    out.write_all(&value.to_ne_bytes())
}

fn write_u64(out: &mut dyn Write, value: u64) -> io::Result<()> {
    out.write_all(&value.to_ne_bytes())
}

fn write_i64(out: &mut dyn Write, value: i64) -> io::Result<()> {
    out.write_all(&value.to_ne_bytes())
}

fn read_u16(input: &mut dyn Read) -> io::Result<u16> {
    let mut buf = [0u8; 2];
    input.read_exact(&mut buf)?;
    Ok(u16::from_ne_bytes(buf))
}

fn read_u32(input: &mut dyn Read) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    input.read_exact(&mut buf)?;
    Ok(u32::from_ne_bytes(buf))
}

fn read_u64(input: &mut dyn Read) -> io::Result<u64> {
    let mut buf = [0u8; 8];
    input.read_exact(&mut buf)?;
    Ok(u64::from_ne_bytes(buf))
}

fn read_i64(input: &mut dyn Read) -> io::Result<i64> {
    let mut buf = [0u8; 8];
    input.read_exact(&mut buf)?;
    Ok(i64::from_ne_bytes(buf))
}

fn write_position(out: &mut dyn Write, position: Position) -> io::Result<()> {
    write_i64(out, position.x)?;
    write_i64(out, position.y)
}

fn read_position(input: &mut dyn Read) -> io::Result<Position> {
    Ok(Position::new(read_i64(input)?, read_i64(input)?))
}

fn write_item(out: &mut dyn Write, item: &Item) -> io::Result<()> {
    write_u32(out, item.item_type)?;
    write_position(out, item.location)?;
    write_u64(out, item.creation_time)?;
    write_u64(out, item.deletion_time)
}

fn read_item(input: &mut dyn Read) -> io::Result<Item> {
    Ok(Item {
        item_type: read_u32(input)?,
        location: read_position(input)?,
        creation_time: read_u64(input)?,
        deletion_time: read_u64(input)?,
    })
}

impl<D: PatchData, T: ItemType> Map<D, T> {
    /// Serializes the map: RNG state, dimensions, then every patch sorted by
    /// key, with payloads delegated to [`PatchData::write_to`]. The
    /// interaction cache is not written; it is rebuilt on load.
    pub fn write_to(
        &self,
        out: &mut dyn Write,
        scribe: &mut dyn Scribe,
    ) -> Result<(), SnapshotError> {
        out.write_all(&SNAPSHOT_MAGIC)?;
        write_u16(out, SNAPSHOT_FORMAT_VERSION)?;
        write_u64(out, self.rng_state())?;
        write_u32(out, self.patch_size())?;
        write_u32(out, self.gibbs_iterations())?;

        let store = self.store();
        let positions = store.sorted_positions();
        write_u64(out, positions.len() as u64)?;
        for patch_position in positions {
            let patch = match store.get(patch_position) {
                Some(patch) => patch,
                None => return Err(SnapshotError::Corrupt("patch vanished during write")),
            };
            write_position(out, patch_position)?;
            out.write_all(&[u8::from(patch.is_fixed())])?;
            write_u64(out, patch.items().len() as u64)?;
            for item in patch.items() {
                write_item(out, item)?;
            }
            patch.data.write_to(out, scribe)?;
        }
        Ok(())
    }

    /// Reconstructs a map from a snapshot, rebuilding the interaction cache
    /// from `types`. Item/patch consistency and configuration validity are
    /// re-checked; violations fail the read.
    pub fn read_from(
        input: &mut dyn Read,
        types: Vec<T>,
        scribe: &mut dyn Scribe,
    ) -> Result<Self, SnapshotError> {
        let mut magic = [0u8; 4];
        input.read_exact(&mut magic)?;
        if magic != SNAPSHOT_MAGIC {
            return Err(SnapshotError::BadMagic);
        }
        let version = read_u16(input)?;
        if version != SNAPSHOT_FORMAT_VERSION {
            return Err(SnapshotError::UnsupportedVersion(version));
        }

        let rng = Lcg64::from_state(read_u64(input)?);
        let patch_size = read_u32(input)?;
        let gibbs_iterations = read_u32(input)?;
        // Dimensions gate the item consistency checks below, so vet them
        // before trusting any patch bytes.
        MapConfig {
            patch_size,
            gibbs_iterations,
            rng_seed: None,
        }
        .validate()?;

        let patch_count = usize::try_from(read_u64(input)?)
            .map_err(|_| SnapshotError::Corrupt("patch count overflows"))?;
        let mut store: PatchStore<D> = PatchStore::new();
        for _ in 0..patch_count {
            let patch_position = read_position(input)?;

            let mut flag = [0u8; 1];
            input.read_exact(&mut flag)?;
            let fixed = match flag[0] {
                0 => false,
                1 => true,
                _ => return Err(SnapshotError::Corrupt("fixed flag out of range")),
            };

            let item_count = usize::try_from(read_u64(input)?)
                .map_err(|_| SnapshotError::Corrupt("item count overflows"))?;
            let mut items = Vec::with_capacity(item_count.min(1024));
            for _ in 0..item_count {
                let item = read_item(input)?;
                if position::world_to_patch(item.location, patch_size) != patch_position {
                    return Err(SnapshotError::Corrupt("item outside its patch"));
                }
                items.push(item);
            }

            let data = D::read_from(input, scribe)?;
            if store
                .insert(patch_position, Patch::from_parts(items, fixed, data))
                .is_some()
            {
                return Err(SnapshotError::Corrupt("duplicate patch key"));
            }
        }

        Ok(Map::from_parts(
            patch_size,
            gibbs_iterations,
            rng,
            store,
            types,
        )?)
    }
}
