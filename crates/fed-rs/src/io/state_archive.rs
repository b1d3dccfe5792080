use crate::types::DType;
use crate::value::{HostTensor, TensorData};
use anyhow::{anyhow, bail, ensure, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;

const MAGIC: &[u8; 8] = b"FEDRSPST";
const VERSION: u32 = 1;

/// Location of one named leaf inside a state archive.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StateArchiveEntry {
    pub name: String,
    pub dims: Vec<usize>,
    pub dtype: DType,
    pub offset: u64,
    pub len: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct StateArchiveIndex {
    entries: Vec<StateArchiveIndexEntry>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct StateArchiveIndexEntry {
    name: String,
    dims: Vec<u64>,
    dtype_tag: u32,
    offset: u64,
    len: u64,
}

/// Random-access reader over an archive written by [`StateArchive::save`].
///
/// Entries keep the order they were written in.
pub struct StateArchiveReader {
    file: BufReader<File>,
    entries: Vec<StateArchiveEntry>,
}

impl StateArchiveReader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut file = BufReader::new(File::open(path)?);

        let mut magic = [0u8; 8];
        file.read_exact(&mut magic)?;
        if &magic != MAGIC {
            bail!("invalid state archive magic header in {}", path.display());
        }

        let version = read_u32(&mut file)?;
        if version != VERSION {
            bail!("unsupported state archive version {}", version);
        }

        let index_len = read_u32(&mut file)? as usize;
        let mut index_bytes = vec![0u8; index_len];
        file.read_exact(&mut index_bytes)?;
        let index: StateArchiveIndex = bincode::deserialize(&index_bytes)?;

        let entries = index
            .entries
            .into_iter()
            .map(|e| {
                let dtype = DType::from_tag(e.dtype_tag)
                    .ok_or_else(|| anyhow!("unknown dtype tag {} in state archive", e.dtype_tag))?;
                let dims = e
                    .dims
                    .into_iter()
                    .map(|d| usize::try_from(d).map_err(|_| anyhow!("leaf {} dim overflow", e.name)))
                    .collect::<Result<Vec<_>>>()?;
                Ok(StateArchiveEntry {
                    name: e.name,
                    dims,
                    dtype,
                    offset: e.offset,
                    len: e.len,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { file, entries })
    }

    pub fn entries(&self) -> &[StateArchiveEntry] {
        &self.entries
    }

    pub fn read_entry(&mut self, entry: &StateArchiveEntry) -> Result<HostTensor> {
        self.file.seek(SeekFrom::Start(entry.offset))?;
        let byte_len = usize::try_from(entry.len)
            .map_err(|_| anyhow!("leaf {} length {} out of range", entry.name, entry.len))?;
        let mut raw = vec![0u8; byte_len];
        self.file.read_exact(&mut raw)?;
        let data = decode_data(entry.dtype, &raw)
            .map_err(|err| anyhow!("leaf {}: {err}", entry.name))?;
        HostTensor::new(entry.dims.clone(), data)
    }
}

/// Flat, ordered list of named host tensors stored in a single file.
pub struct StateArchive;

impl StateArchive {
    pub fn load(path: impl AsRef<Path>) -> Result<Vec<(String, HostTensor)>> {
        let mut reader = StateArchiveReader::open(path)?;
        let entries = reader.entries().to_vec();
        let mut leaves = Vec::with_capacity(entries.len());
        for entry in entries {
            let tensor = reader.read_entry(&entry)?;
            leaves.push((entry.name, tensor));
        }
        Ok(leaves)
    }

    /// Writes `leaves` in order. Names need not be unique.
    pub fn save(path: impl AsRef<Path>, leaves: &[(String, HostTensor)]) -> Result<()> {
        let payloads = leaves
            .iter()
            .map(|(_, tensor)| encode_data(tensor.data()))
            .collect::<Vec<_>>();

        let mut index_entries = Vec::with_capacity(leaves.len());
        let mut running_offset: u64 = 0;
        for ((name, tensor), payload) in leaves.iter().zip(&payloads) {
            let len = payload.len() as u64;
            index_entries.push(StateArchiveIndexEntry {
                name: name.clone(),
                dims: tensor.shape().iter().map(|&d| d as u64).collect(),
                dtype_tag: tensor.dtype().tag(),
                offset: running_offset,
                len,
            });
            running_offset = running_offset
                .checked_add(len)
                .ok_or_else(|| anyhow!("state archive data offset overflow"))?;
        }

        let mut index = StateArchiveIndex {
            entries: index_entries,
        };
        let index_len = bincode::serialize(&index)?.len();
        ensure!(index_len <= u32::MAX as usize, "state archive index too large");

        // Offsets are fixed-width in bincode, so relocating them keeps the index length.
        let data_start = (MAGIC.len() + 4 + 4 + index_len) as u64;
        for entry in index.entries.iter_mut() {
            entry.offset = entry
                .offset
                .checked_add(data_start)
                .ok_or_else(|| anyhow!("state archive offset overflow"))?;
        }
        let index_bytes = bincode::serialize(&index)?;
        ensure!(
            index_bytes.len() == index_len,
            "state archive index length mismatch after offset fixup"
        );

        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(MAGIC)?;
        writer.write_all(&VERSION.to_le_bytes())?;
        writer.write_all(&(index_len as u32).to_le_bytes())?;
        writer.write_all(&index_bytes)?;
        for payload in &payloads {
            writer.write_all(payload)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()?;
        Ok(())
    }
}

fn encode_data(data: &TensorData) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() * data.dtype().size_in_bytes());
    match data {
        TensorData::Bool(v) => out.extend(v.iter().map(|&b| u8::from(b))),
        TensorData::I32(v) => v.iter().for_each(|x| out.extend_from_slice(&x.to_le_bytes())),
        TensorData::I64(v) => v.iter().for_each(|x| out.extend_from_slice(&x.to_le_bytes())),
        TensorData::F32(v) => v.iter().for_each(|x| out.extend_from_slice(&x.to_le_bytes())),
        TensorData::F64(v) => v.iter().for_each(|x| out.extend_from_slice(&x.to_le_bytes())),
    }
    out
}

fn decode_data(dtype: DType, raw: &[u8]) -> Result<TensorData> {
    let width = dtype.size_in_bytes();
    ensure!(raw.len() % width == 0, "data size misaligned for {}", dtype);
    let data = match dtype {
        DType::Bool => TensorData::Bool(raw.iter().map(|&b| b != 0).collect()),
        DType::I32 => TensorData::I32(
            raw.chunks_exact(4)
                .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect(),
        ),
        DType::I64 => TensorData::I64(
            raw.chunks_exact(8)
                .map(|c| i64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
                .collect(),
        ),
        DType::F32 => TensorData::F32(
            raw.chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect(),
        ),
        DType::F64 => TensorData::F64(
            raw.chunks_exact(8)
                .map(|c| f64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
                .collect(),
        ),
    };
    Ok(data)
}

fn read_u32(reader: &mut impl Read) -> Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}
