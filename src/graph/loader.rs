use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::Path;
use std::time::Instant;

use tracing::{debug, info};

use super::{Dataset, DatasetMeta, DatasetParts, StoredRankings};
use crate::types::{Context, GnnError, NodeId, Result};

/// Scalar sizes, one `KEY VALUE` pair per line.
pub const META_FILE: &str = "meta.txt";
/// Feature matrix, `f32`.
pub const FEAT_FILE: &str = "feat.bin";
/// Labels, `i64`.
pub const LABEL_FILE: &str = "label.bin";
/// CSR offsets, `u32`.
pub const INDPTR_FILE: &str = "indptr.bin";
/// CSR neighbors, `u32`.
pub const INDICES_FILE: &str = "indices.bin";
/// Training seeds, `u32`.
pub const TRAIN_SET_FILE: &str = "train_set.bin";
/// Test nodes, `u32`.
pub const TEST_SET_FILE: &str = "test_set.bin";
/// Validation nodes, `u32`.
pub const VALID_SET_FILE: &str = "valid_set.bin";
/// Per-edge weights, `f32`.
pub const EDGE_WEIGHT_FILE: &str = "edge_weight.bin";
/// Alias probabilities, `f32`.
pub const PROB_TABLE_FILE: &str = "prob_table.bin";
/// Alias targets, `u32`.
pub const ALIAS_TABLE_FILE: &str = "alias_table.bin";
/// In-degrees, `u32`.
pub const IN_DEGREE_FILE: &str = "in_degrees.bin";
/// Out-degrees, `u32`.
pub const OUT_DEGREE_FILE: &str = "out_degrees.bin";
/// Node ranking for the degree cache policy, `u32`.
pub const CACHE_BY_DEGREE_FILE: &str = "cache_by_degree.bin";
/// Node ranking for the heuristic cache policy, `u32`.
pub const CACHE_BY_HEURISTIC_FILE: &str = "cache_by_heuristic.bin";

const META_NUM_NODE: &str = "NUM_NODE";
const META_NUM_EDGE: &str = "NUM_EDGE";
const META_FEAT_DIM: &str = "FEAT_DIM";
const META_NUM_CLASS: &str = "NUM_CLASS";
const META_NUM_TRAIN_SET: &str = "NUM_TRAIN_SET";
const META_NUM_TEST_SET: &str = "NUM_TEST_SET";
const META_NUM_VALID_SET: &str = "NUM_VALID_SET";

impl Dataset {
    /// Loads a dataset directory.
    ///
    /// Missing features or labels become zeros; missing degree arrays,
    /// alias tables and cache rankings are derived on demand.
    pub fn load(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let started = Instant::now();
        let meta_map = read_meta(dir)?;
        let meta = DatasetMeta {
            num_node: meta_value(&meta_map, META_NUM_NODE)?,
            num_edge: meta_value(&meta_map, META_NUM_EDGE)?,
            feat_dim: meta_value(&meta_map, META_FEAT_DIM)?,
            num_class: meta_value(&meta_map, META_NUM_CLASS)?,
        };
        let n = meta.num_node;

        let indptr = read_u32s(dir, INDPTR_FILE)?
            .ok_or_else(|| GnnError::dataset(INDPTR_FILE, "missing"))?;
        let indices = read_u32s(dir, INDICES_FILE)?
            .ok_or_else(|| GnnError::dataset(INDICES_FILE, "missing"))?;
        let feat = read_f32s(dir, FEAT_FILE)?.unwrap_or_else(|| {
            debug!(dir = %dir.display(), "dataset.load.zero_features");
            vec![0.0; n * meta.feat_dim]
        });
        let label = read_i64s(dir, LABEL_FILE)?.unwrap_or_else(|| vec![0; n]);
        let train_set = read_set(dir, TRAIN_SET_FILE, &meta_map, META_NUM_TRAIN_SET)?;
        let test_set = read_set(dir, TEST_SET_FILE, &meta_map, META_NUM_TEST_SET)?;
        let valid_set = read_set(dir, VALID_SET_FILE, &meta_map, META_NUM_VALID_SET)?;
        let weights = read_f32s(dir, EDGE_WEIGHT_FILE)?;
        let prob_alias = match (read_f32s(dir, PROB_TABLE_FILE)?, read_u32s(dir, ALIAS_TABLE_FILE)?) {
            (Some(prob), Some(alias)) => Some((prob, alias)),
            (None, None) => None,
            _ => {
                return Err(GnnError::dataset(
                    PROB_TABLE_FILE,
                    "prob and alias tables must be present together",
                ))
            }
        };
        let rankings = StoredRankings {
            by_degree: read_u32s(dir, CACHE_BY_DEGREE_FILE)?,
            by_heuristic: read_u32s(dir, CACHE_BY_HEURISTIC_FILE)?,
        };
        let dataset = Dataset::from_parts(
            meta,
            DatasetParts {
                indptr,
                indices,
                weights,
                prob_alias,
                in_degrees: read_u32s(dir, IN_DEGREE_FILE)?,
                out_degrees: read_u32s(dir, OUT_DEGREE_FILE)?,
                feat,
                label,
                train_set,
                valid_set,
                test_set,
                rankings,
                ctx: Context::cpu(),
            },
        )?;
        info!(
            dir = %dir.display(),
            num_node = meta.num_node,
            num_edge = meta.num_edge,
            feat_dim = meta.feat_dim,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "dataset.load.done"
        );
        Ok(dataset)
    }

    /// Writes the dataset in the layout [`Dataset::load`] reads.
    pub fn save(&self, dir: impl AsRef<Path>) -> Result<()> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let meta = self.meta();
        let mut text = String::new();
        for (key, value) in [
            (META_NUM_NODE, meta.num_node),
            (META_NUM_EDGE, meta.num_edge),
            (META_FEAT_DIM, meta.feat_dim),
            (META_NUM_CLASS, meta.num_class),
            (META_NUM_TRAIN_SET, self.train_set().len()),
            (META_NUM_TEST_SET, self.test_set().len()),
            (META_NUM_VALID_SET, self.valid_set().len()),
        ] {
            text.push_str(&format!("{key} {value}\n"));
        }
        fs::write(dir.join(META_FILE), text)?;
        write_array(dir, INDPTR_FILE, self.indptr(), |v| v.to_le_bytes())?;
        write_array(dir, INDICES_FILE, self.indices(), |v| v.to_le_bytes())?;
        write_array(dir, FEAT_FILE, self.features(), |v| v.to_le_bytes())?;
        write_array(dir, LABEL_FILE, self.labels(), |v| v.to_le_bytes())?;
        write_array(dir, TRAIN_SET_FILE, self.train_set(), |v| v.to_le_bytes())?;
        write_array(dir, TEST_SET_FILE, self.test_set(), |v| v.to_le_bytes())?;
        write_array(dir, VALID_SET_FILE, self.valid_set(), |v| v.to_le_bytes())?;
        write_array(dir, IN_DEGREE_FILE, self.in_degrees(), |v| v.to_le_bytes())?;
        write_array(dir, OUT_DEGREE_FILE, self.out_degrees(), |v| v.to_le_bytes())?;
        if let Some(weights) = self.edge_weights() {
            write_array(dir, EDGE_WEIGHT_FILE, weights, |v| v.to_le_bytes())?;
            let tables = self.weight_tables();
            write_array(dir, PROB_TABLE_FILE, tables.prob(), |v| v.to_le_bytes())?;
            write_array(dir, ALIAS_TABLE_FILE, tables.alias(), |v| v.to_le_bytes())?;
        }
        debug!(dir = %dir.display(), "dataset.save.done");
        Ok(())
    }
}

/// Writes a cache ranking next to a saved dataset.
pub(crate) fn write_ranking(dir: &Path, file: &str, ranking: &[NodeId]) -> Result<()> {
    write_array(dir, file, ranking, |v| v.to_le_bytes())
}

fn read_meta(dir: &Path) -> Result<HashMap<String, usize>> {
    let path = dir.join(META_FILE);
    let text = fs::read_to_string(&path).map_err(|err| match err.kind() {
        ErrorKind::NotFound => GnnError::dataset(META_FILE, "missing"),
        _ => GnnError::Io(err),
    })?;
    let mut map = HashMap::new();
    for (lineno, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut parts = line.split_whitespace();
        let (Some(key), Some(value), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(GnnError::dataset(
                META_FILE,
                format!("line {} is not `KEY VALUE`", lineno + 1),
            ));
        };
        let value = value.parse::<usize>().map_err(|_| {
            GnnError::dataset(META_FILE, format!("{key} has non-numeric value {value:?}"))
        })?;
        map.insert(key.to_string(), value);
    }
    Ok(map)
}

fn meta_value(map: &HashMap<String, usize>, key: &str) -> Result<usize> {
    map.get(key)
        .copied()
        .ok_or_else(|| GnnError::dataset(META_FILE, format!("missing {key}")))
}

fn read_set(
    dir: &Path,
    file: &str,
    meta: &HashMap<String, usize>,
    key: &str,
) -> Result<Vec<NodeId>> {
    let set = read_u32s(dir, file)?.unwrap_or_default();
    if let Some(expected) = meta.get(key) {
        if *expected != set.len() {
            return Err(GnnError::dataset(
                file,
                format!("{key} says {expected} entries, found {}", set.len()),
            ));
        }
    }
    Ok(set)
}

fn read_bytes(dir: &Path, file: &str, width: usize) -> Result<Option<Vec<u8>>> {
    match fs::read(dir.join(file)) {
        Ok(bytes) => {
            if bytes.len() % width != 0 {
                return Err(GnnError::dataset(
                    file,
                    format!("length {} is not a multiple of {width}", bytes.len()),
                ));
            }
            Ok(Some(bytes))
        }
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn read_u32s(dir: &Path, file: &str) -> Result<Option<Vec<u32>>> {
    Ok(read_bytes(dir, file, 4)?.map(|bytes| {
        bytes
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }))
}

fn read_f32s(dir: &Path, file: &str) -> Result<Option<Vec<f32>>> {
    Ok(read_bytes(dir, file, 4)?.map(|bytes| {
        bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }))
}

fn read_i64s(dir: &Path, file: &str) -> Result<Option<Vec<i64>>> {
    Ok(read_bytes(dir, file, 8)?.map(|bytes| {
        bytes
            .chunks_exact(8)
            .map(|c| i64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
            .collect()
    }))
}

fn write_array<T: Copy, const N: usize>(
    dir: &Path,
    file: &str,
    values: &[T],
    encode: impl Fn(T) -> [u8; N],
) -> Result<()> {
    let mut out = BufWriter::new(File::create(dir.join(file))?);
    for value in values {
        out.write_all(&encode(*value))?;
    }
    out.flush()?;
    Ok(())
}
