//! Minimal `.npy` (NumPy format 1.0/2.0) support for `float32` arrays.
//!
//! Spectrograms are stored the way `np.save` writes them: little-endian `<f4`,
//! C order, header padded to a 64-byte boundary.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use ndarray::{ArrayBase, ArrayD, Data, Dimension, IxDyn, ShapeBuilder};

const MAGIC: &[u8; 6] = b"\x93NUMPY";
const HEADER_ALIGN: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum NpyError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("not an npy file")]
    BadMagic,
    #[error("unsupported npy version {0}.{1}")]
    UnsupportedVersion(u8, u8),
    #[error("malformed npy header: {0}")]
    Header(String),
    #[error("unsupported dtype {0} (need <f4)")]
    UnsupportedDtype(String),
    #[error("data length {got} does not match shape {shape:?}")]
    DataLength { got: usize, shape: Vec<usize> },
}

/// Write `array` as a C-ordered `<f4` npy file.
///
/// The data goes to a `.tmp` sibling first and is renamed over `path` once
/// complete, so `path` never holds a partial file.
pub fn write_f32<S, D>(path: impl AsRef<Path>, array: &ArrayBase<S, D>) -> Result<(), NpyError>
where
    S: Data<Elem = f32>,
    D: Dimension,
{
    let path = path.as_ref();
    let tmp = temp_sibling(path);
    let written = write_to(&tmp, array).and_then(|()| fs::rename(&tmp, path));
    if written.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    written.map_err(NpyError::from)
}

fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

fn write_to<S, D>(path: &Path, array: &ArrayBase<S, D>) -> std::io::Result<()>
where
    S: Data<Elem = f32>,
    D: Dimension,
{
    let file = File::create(path)?;
    let mut out = BufWriter::new(&file);
    out.write_all(&header_bytes(array.shape()))?;
    for &v in array.iter() {
        out.write_all(&v.to_le_bytes())?;
    }
    out.flush()?;
    drop(out);
    file.sync_all()
}

fn header_bytes(shape: &[usize]) -> Vec<u8> {
    let shape_str = match shape {
        [single] => format!("({single},)"),
        dims => format!(
            "({})",
            dims.iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        ),
    };
    let mut dict = format!("{{'descr': '<f4', 'fortran_order': False, 'shape': {shape_str}, }}");

    // magic(6) + version(2) + header_len(2) + dict + '\n'
    let unpadded = MAGIC.len() + 2 + 2 + dict.len() + 1;
    let pad = (HEADER_ALIGN - unpadded % HEADER_ALIGN) % HEADER_ALIGN;
    dict.extend(std::iter::repeat_n(' ', pad));
    dict.push('\n');

    let mut bytes = Vec::with_capacity(unpadded + pad);
    bytes.extend_from_slice(MAGIC);
    bytes.extend_from_slice(&[1, 0]);
    bytes.extend_from_slice(&(dict.len() as u16).to_le_bytes());
    bytes.extend_from_slice(dict.as_bytes());
    bytes
}

/// Read a `<f4` npy file into a dynamically shaped array.
pub fn read_f32(path: impl AsRef<Path>) -> Result<ArrayD<f32>, NpyError> {
    let mut reader = BufReader::new(File::open(path)?);

    let mut preamble = [0u8; 8];
    reader.read_exact(&mut preamble)?;
    if &preamble[..6] != MAGIC {
        return Err(NpyError::BadMagic);
    }
    let header_len = match (preamble[6], preamble[7]) {
        (1, 0) => {
            let mut len = [0u8; 2];
            reader.read_exact(&mut len)?;
            usize::from(u16::from_le_bytes(len))
        }
        (2, 0) | (3, 0) => {
            let mut len = [0u8; 4];
            reader.read_exact(&mut len)?;
            u32::from_le_bytes(len) as usize
        }
        (major, minor) => return Err(NpyError::UnsupportedVersion(major, minor)),
    };

    let mut header = vec![0u8; header_len];
    reader.read_exact(&mut header)?;
    let header = String::from_utf8(header).map_err(|_| NpyError::Header("not utf-8".into()))?;
    let (descr, fortran_order, shape) = parse_header(&header)?;
    if descr != "<f4" {
        return Err(NpyError::UnsupportedDtype(descr));
    }

    let mut raw = Vec::new();
    reader.read_to_end(&mut raw)?;
    let count: usize = shape.iter().product();
    if raw.len() != count * 4 {
        return Err(NpyError::DataLength {
            got: raw.len() / 4,
            shape,
        });
    }
    let data: Vec<f32> = raw
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();

    let dim = IxDyn(&shape);
    let array = if fortran_order {
        ArrayD::from_shape_vec(dim.f(), data)
    } else {
        ArrayD::from_shape_vec(dim, data)
    };
    array.map_err(|e| NpyError::Header(e.to_string()))
}

fn dict_value<'a>(header: &'a str, key: &str) -> Result<&'a str, NpyError> {
    let needle = format!("'{key}':");
    let start = header
        .find(&needle)
        .ok_or_else(|| NpyError::Header(format!("missing key {key}")))?
        + needle.len();
    Ok(header[start..].trim_start())
}

fn parse_header(header: &str) -> Result<(String, bool, Vec<usize>), NpyError> {
    let descr_rest = dict_value(header, "descr")?;
    let descr = descr_rest
        .strip_prefix('\'')
        .and_then(|s| s.split('\'').next())
        .ok_or_else(|| NpyError::Header("descr is not a string".into()))?
        .to_string();

    let fortran_order = dict_value(header, "fortran_order")?.starts_with("True");

    let shape_rest = dict_value(header, "shape")?;
    let inner = shape_rest
        .strip_prefix('(')
        .and_then(|s| s.split(')').next())
        .ok_or_else(|| NpyError::Header("shape is not a tuple".into()))?;
    let shape = inner
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<usize>()
                .map_err(|_| NpyError::Header(format!("bad dimension {s:?}")))
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok((descr, fortran_order, shape))
}
