use std::fs;
use std::io::{Read, Write};
use std::path::Path;
use std::rc::Rc;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{Error, Result};
use crate::value::{ArrayValue, Dtype};

/// Backend an array sidecar writes to, per `spec.md` §4.F's `backend`
/// option and §6's external-interface contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Npy,
    Hdf5,
}

impl Backend {
    pub fn name(self) -> &'static str {
        match self {
            Backend::Npy => "npy",
            Backend::Hdf5 => "hdf5",
        }
    }
}

/// Component E: partitions large numeric arrays out of the rendered source
/// and into an out-of-band store, per `spec.md` §4.E.
///
/// Keys are dense, zero-based, and assigned in first-encounter order
/// (`spec.md` §3, "Array sidecar keys are dense...").
#[derive(Debug, Default)]
pub struct ArraySidecar {
    entries: Vec<Rc<ArrayValue>>,
}

impl ArraySidecar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Record an array, returning its sidecar key (`array_<N>`).
    pub fn put(&mut self, array: Rc<ArrayValue>) -> String {
        let key = format!("array_{}", self.entries.len());
        self.entries.push(array);
        key
    }

    pub fn entries(&self) -> impl Iterator<Item = (String, &Rc<ArrayValue>)> {
        self.entries
            .iter()
            .enumerate()
            .map(|(i, a)| (format!("array_{i}"), a))
    }

    /// Write every recorded array to `dir` using `backend`.
    pub fn save(&self, dir: &Path, backend: Backend) -> Result<()> {
        fs::create_dir_all(dir)?;
        match backend {
            Backend::Npy => {
                for (key, array) in self.entries() {
                    let path = dir.join(format!("{key}.npy"));
                    let mut file = fs::File::create(&path)?;
                    write_npy(&mut file, array)?;
                }
            }
            Backend::Hdf5 => {
                // No real HDF5 library is vendored here (see DESIGN.md); a
                // directory of per-key raw+metadata files stands in for the
                // single `arrays.h5` file the external contract names.
                let container = dir.join("arrays.h5.d");
                fs::create_dir_all(&container)?;
                for (key, array) in self.entries() {
                    let meta = serde_json::json!({
                        "shape": array.shape,
                        "dtype": format!("{:?}", array.dtype),
                    });
                    fs::write(container.join(format!("{key}.json")), meta.to_string())?;
                    fs::write(container.join(format!("{key}.bin")), array.data.as_slice())?;
                }
            }
        }
        Ok(())
    }

    /// Inverse of `save`; used by emitted artifacts' loader boilerplate
    /// (`crate::package`) and, directly, by tests.
    pub fn load(dir: &Path, backend: Backend) -> Result<Self> {
        let mut entries = Vec::new();
        match backend {
            Backend::Npy => {
                let mut index = 0;
                loop {
                    let path = dir.join(format!("array_{index}.npy"));
                    if !path.exists() {
                        break;
                    }
                    let mut file = fs::File::open(&path)?;
                    entries.push(Rc::new(read_npy(&mut file)?));
                    index += 1;
                }
            }
            Backend::Hdf5 => {
                let container = dir.join("arrays.h5.d");
                let mut index = 0;
                loop {
                    let meta_path = container.join(format!("array_{index}.json"));
                    if !meta_path.exists() {
                        break;
                    }
                    let meta: serde_json::Value = serde_json::from_str(&fs::read_to_string(&meta_path)?)?;
                    let shape: Vec<usize> = meta["shape"]
                        .as_array()
                        .ok_or_else(|| Error::CorruptArchive {
                            detail: format!("array_{index} metadata missing shape"),
                        })?
                        .iter()
                        .map(|v| v.as_u64().unwrap_or(0) as usize)
                        .collect();
                    let dtype = parse_dtype_debug(meta["dtype"].as_str().unwrap_or(""))?;
                    let data = fs::read(container.join(format!("array_{index}.bin")))?;
                    entries.push(Rc::new(ArrayValue {
                        shape,
                        dtype,
                        little_endian: true,
                        data: Rc::new(data),
                    }));
                    index += 1;
                }
            }
        }
        Ok(Self { entries })
    }
}

fn parse_dtype_debug(s: &str) -> Result<Dtype> {
    Ok(match s {
        "I8" => Dtype::I8,
        "I16" => Dtype::I16,
        "I32" => Dtype::I32,
        "I64" => Dtype::I64,
        "U8" => Dtype::U8,
        "U16" => Dtype::U16,
        "U32" => Dtype::U32,
        "U64" => Dtype::U64,
        "F32" => Dtype::F32,
        "F64" => Dtype::F64,
        "Bool" => Dtype::Bool,
        other => {
            return Err(Error::CorruptArchive {
                detail: format!("unknown dtype tag {other}"),
            });
        }
    })
}

const NPY_MAGIC: &[u8] = b"\x93NUMPY";

/// Writes the standard NumPy `.npy` format: magic, version, a little-endian
/// header-length field, the ASCII header dict, then raw element bytes.
/// `spec.md` §6 calls out bit-exact compatibility as part of the external
/// contract, so the header is padded to a 64-byte alignment as the
/// reference format requires.
fn write_npy<W: Write>(out: &mut W, array: &ArrayValue) -> Result<()> {
    let shape_str = if array.shape.len() == 1 {
        format!("({},)", array.shape[0])
    } else {
        format!(
            "({})",
            array
                .shape
                .iter()
                .map(|d| d.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        )
    };

    let header_body = format!(
        "{{'descr': '{}', 'fortran_order': False, 'shape': {}, }}",
        array.dtype.descr(),
        shape_str
    );

    // magic(6) + version(2) + header-len field(2) = 10 bytes of preamble;
    // pad the body+newline so the total is a multiple of 64.
    let preamble_len = 10;
    let mut header = header_body.into_bytes();
    header.push(b'\n');
    let unpadded = preamble_len + header.len();
    let padded = unpadded.div_ceil(64) * 64;
    let pad = padded - unpadded;
    // reinsert padding before the trailing newline
    header.pop();
    header.extend(std::iter::repeat(b' ').take(pad));
    header.push(b'\n');

    out.write_all(NPY_MAGIC)?;
    out.write_all(&[1, 0])?; // version 1.0
    out.write_u16::<LittleEndian>(header.len() as u16)?;
    out.write_all(&header)?;
    out.write_all(&array.data)?;
    Ok(())
}

fn read_npy<R: Read>(input: &mut R) -> Result<ArrayValue> {
    let mut magic = [0u8; 6];
    input.read_exact(&mut magic)?;
    if magic != NPY_MAGIC[..] {
        return Err(Error::CorruptArchive {
            detail: "bad .npy magic".into(),
        });
    }
    let mut version = [0u8; 2];
    input.read_exact(&mut version)?;
    let header_len = input.read_u16::<LittleEndian>()? as usize;
    let mut header = vec![0u8; header_len];
    input.read_exact(&mut header)?;
    let header = String::from_utf8_lossy(&header);

    let descr = extract_field(&header, "descr")?;
    let shape_str = extract_field(&header, "shape")?;
    let dtype = dtype_from_descr(&descr)?;
    let shape = shape_str
        .trim_matches(|c| c == '(' || c == ')')
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<usize>().unwrap_or(0))
        .collect::<Vec<_>>();

    let mut data = Vec::new();
    input.read_to_end(&mut data)?;

    Ok(ArrayValue {
        shape,
        dtype,
        little_endian: true,
        data: Rc::new(data),
    })
}

fn extract_field(header: &str, field: &str) -> Result<String> {
    let needle = format!("'{field}':");
    let start = header.find(&needle).ok_or_else(|| Error::CorruptArchive {
        detail: format!("npy header missing '{field}'"),
    })? + needle.len();
    let rest = &header[start..];
    let rest = rest.trim_start();
    if let Some(stripped) = rest.strip_prefix('\'') {
        let end = stripped.find('\'').unwrap_or(stripped.len());
        Ok(stripped[..end].to_string())
    } else if let Some(stripped) = rest.strip_prefix('(') {
        let end = stripped.find(')').unwrap_or(stripped.len());
        Ok(format!("({}", &stripped[..=end.min(stripped.len().saturating_sub(1))]))
    } else {
        Err(Error::CorruptArchive {
            detail: format!("malformed '{field}' in npy header"),
        })
    }
}

fn dtype_from_descr(descr: &str) -> Result<Dtype> {
    Ok(match descr {
        "|i1" => Dtype::I8,
        "|u1" => Dtype::U8,
        "|b1" => Dtype::Bool,
        "<i2" => Dtype::I16,
        "<u2" => Dtype::U16,
        "<i4" => Dtype::I32,
        "<u4" => Dtype::U32,
        "<f4" => Dtype::F32,
        "<i8" => Dtype::I64,
        "<u8" => Dtype::U64,
        "<f8" => Dtype::F64,
        other => {
            return Err(Error::CorruptArchive {
                detail: format!("unsupported dtype descr {other}"),
            });
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_array() -> ArrayValue {
        let data: Vec<u8> = (0..10i32).flat_map(|v| v.to_le_bytes()).collect();
        ArrayValue {
            shape: vec![10],
            dtype: Dtype::I32,
            little_endian: true,
            data: Rc::new(data),
        }
    }

    #[test]
    fn npy_round_trips() {
        let array = sample_array();
        let mut buf = Vec::new();
        write_npy(&mut buf, &array).unwrap();
        let mut cursor = std::io::Cursor::new(buf);
        let read_back = read_npy(&mut cursor).unwrap();
        assert_eq!(read_back.shape, array.shape);
        assert_eq!(read_back.dtype, array.dtype);
        assert_eq!(read_back.data, array.data);
    }

    #[test]
    fn keys_are_dense_and_zero_based() {
        let mut sidecar = ArraySidecar::new();
        let a = sidecar.put(Rc::new(sample_array()));
        let b = sidecar.put(Rc::new(sample_array()));
        assert_eq!(a, "array_0");
        assert_eq!(b, "array_1");
        assert_eq!(sidecar.len(), 2);
    }

    #[test]
    fn save_then_load_npy_directory() {
        let dir = tempfile::tempdir().unwrap();
        let mut sidecar = ArraySidecar::new();
        sidecar.put(Rc::new(sample_array()));
        sidecar.save(dir.path(), Backend::Npy).unwrap();
        let loaded = ArraySidecar::load(dir.path(), Backend::Npy).unwrap();
        assert_eq!(loaded.len(), 1);
    }
}
