// catalogue.rs — Kernel combination catalogue
//
// Holds, per (operator type, backend), the ordered list of index-correlated
// (layout, dtype) combinations a kernel can execute, plus each operator's
// precision class. Loaded from JSON catalogue files; the judge only reads it
// through the `KernelCatalogue` trait.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::dtype::DataType;
use crate::layout::Format;
use crate::precision::PrecisionClass;

// ── Data types ──────────────────────────────────────────────────────────────

/// Physical backend a node has been assigned to.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    /// Matrix (cube) unit.
    #[default]
    Cube,
    /// Vector unit.
    Vector,
    /// Host-side CPU kernels.
    Cpu,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Cube => write!(f, "cube"),
            Backend::Vector => write!(f, "vector"),
            Backend::Cpu => write!(f, "cpu"),
        }
    }
}

/// One (layout, dtype) entry of a combination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SlotSpec {
    pub format: Format,
    pub dtype: DataType,
}

impl SlotSpec {
    pub const fn new(format: Format, dtype: DataType) -> Self {
        SlotSpec { format, dtype }
    }
}

/// Addresses one input or output slot of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    Input(usize),
    Output(usize),
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Slot::Input(i) => write!(f, "input {}", i),
            Slot::Output(i) => write!(f, "output {}", i),
        }
    }
}

/// One row of a kernel table. All slots are selected together.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Combination {
    pub inputs: Vec<SlotSpec>,
    pub outputs: Vec<SlotSpec>,
}

impl Combination {
    pub fn new(inputs: Vec<SlotSpec>, outputs: Vec<SlotSpec>) -> Self {
        Combination { inputs, outputs }
    }

    pub fn slot(&self, slot: Slot) -> Option<&SlotSpec> {
        match slot {
            Slot::Input(i) => self.inputs.get(i),
            Slot::Output(i) => self.outputs.get(i),
        }
    }
}

/// Ordered combinations of one kernel. Earlier rows win ties.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KernelTable {
    pub op_type: String,
    #[serde(default)]
    pub backend: Backend,
    /// The kernel consumes origin shapes as-is; only dtypes are rewritten.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub no_reshape: bool,
    pub combinations: Vec<Combination>,
}

impl KernelTable {
    pub fn new(op_type: impl Into<String>, backend: Backend, combinations: Vec<Combination>) -> Self {
        KernelTable {
            op_type: op_type.into(),
            backend,
            no_reshape: false,
            combinations,
        }
    }

    pub fn with_no_reshape(mut self) -> Self {
        self.no_reshape = true;
        self
    }

    /// Indices of combinations whose arity matches a node's slots.
    pub fn indices_for_arity(&self, inputs: usize, outputs: usize) -> Vec<usize> {
        self.combinations
            .iter()
            .enumerate()
            .filter(|(_, c)| c.inputs.len() == inputs && c.outputs.len() == outputs)
            .map(|(i, _)| i)
            .collect()
    }

    pub fn spec(&self, index: usize, slot: Slot) -> Option<&SlotSpec> {
        self.combinations.get(index).and_then(|c| c.slot(slot))
    }

    /// Distinct dtypes declared at `slot` by the given combinations, in table order.
    pub fn dtypes_at(&self, indices: &[usize], slot: Slot) -> Vec<DataType> {
        let mut out: Vec<DataType> = Vec::new();
        for &i in indices {
            if let Some(spec) = self.spec(i, slot) {
                if !out.contains(&spec.dtype) {
                    out.push(spec.dtype);
                }
            }
        }
        out
    }
}

// ── Query interface ─────────────────────────────────────────────────────────

/// Read-only catalogue queries used by the judge.
pub trait KernelCatalogue {
    fn lookup(&self, op_type: &str, backend: Backend) -> Option<&KernelTable>;
    fn precision_class(&self, op_type: &str) -> PrecisionClass;
}

/// Errors that can occur during catalogue loading.
#[derive(Debug)]
pub enum CatalogueError {
    IoError {
        path: PathBuf,
        source: std::io::Error,
    },
    ParseError {
        file: PathBuf,
        message: String,
    },
    DuplicateKernel {
        op_type: String,
        backend: Backend,
        first: PathBuf,
        second: PathBuf,
    },
}

impl fmt::Display for CatalogueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CatalogueError::IoError { path, source } => {
                write!(f, "{}: {}", path.display(), source)
            }
            CatalogueError::ParseError { file, message } => {
                write!(f, "{}: {}", file.display(), message)
            }
            CatalogueError::DuplicateKernel {
                op_type,
                backend,
                first,
                second,
            } => {
                write!(
                    f,
                    "duplicate kernel '{}' on {}: first defined in {}, redefined in {}",
                    op_type,
                    backend,
                    first.display(),
                    second.display()
                )
            }
        }
    }
}

impl std::error::Error for CatalogueError {}

/// On-disk catalogue file layout.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogueFile {
    #[serde(default)]
    pub kernels: Vec<KernelTable>,
    #[serde(default)]
    pub precision_classes: BTreeMap<String, PrecisionClass>,
}

// ── Catalogue ───────────────────────────────────────────────────────────────

/// In-memory kernel catalogue. Populated from JSON files or programmatically.
#[derive(Debug, Clone, Default)]
pub struct Catalogue {
    tables: BTreeMap<(String, Backend), (KernelTable, PathBuf)>,
    classes: BTreeMap<String, PrecisionClass>,
}

const BUILTIN_SOURCE: &str = "<builtin>";

impl Catalogue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a kernel table defined in code.
    pub fn add_table(&mut self, table: KernelTable) -> Result<(), CatalogueError> {
        self.insert(table, Path::new(BUILTIN_SOURCE))
    }

    pub fn set_precision_class(&mut self, op_type: impl Into<String>, class: PrecisionClass) {
        self.classes.insert(op_type.into(), class);
    }

    fn insert(&mut self, table: KernelTable, source: &Path) -> Result<(), CatalogueError> {
        let key = (table.op_type.clone(), table.backend);
        if let Some((_, first)) = self.tables.get(&key) {
            return Err(CatalogueError::DuplicateKernel {
                op_type: table.op_type,
                backend: table.backend,
                first: first.clone(),
                second: source.to_path_buf(),
            });
        }
        self.tables.insert(key, (table, source.to_path_buf()));
        Ok(())
    }

    /// Load kernels from a JSON catalogue file. Returns the number of kernel
    /// tables found.
    pub fn load_json(&mut self, path: &Path) -> Result<usize, CatalogueError> {
        let source = std::fs::read_to_string(path).map_err(|e| CatalogueError::IoError {
            path: path.to_path_buf(),
            source: e,
        })?;
        self.load_json_str(&source, path)
    }

    /// Load kernels from JSON text; `origin` names the source in errors.
    pub fn load_json_str(&mut self, source: &str, origin: &Path) -> Result<usize, CatalogueError> {
        let file: CatalogueFile =
            serde_json::from_str(source).map_err(|e| CatalogueError::ParseError {
                file: origin.to_path_buf(),
                message: e.to_string(),
            })?;
        let count = file.kernels.len();
        for table in file.kernels {
            self.insert(table, origin)?;
        }
        self.classes.extend(file.precision_classes);
        Ok(count)
    }

    pub fn tables(&self) -> impl Iterator<Item = &KernelTable> {
        self.tables.values().map(|(t, _)| t)
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Compact JSON of the whole catalogue in key order. Stable across load
    /// order, used as the fingerprint input.
    pub fn canonical_json(&self) -> String {
        let file = CatalogueFile {
            kernels: self.tables().cloned().collect(),
            precision_classes: self.classes.clone(),
        };
        serde_json::to_string(&file).unwrap_or_default()
    }

    /// SHA-256 of `canonical_json()`, hex encoded (64 characters).
    pub fn fingerprint(&self) -> String {
        use sha2::{Digest, Sha256};
        use std::fmt::Write;

        let mut hasher = Sha256::new();
        hasher.update(self.canonical_json().as_bytes());
        let digest = hasher.finalize();
        let mut s = String::with_capacity(64);
        for b in digest.iter() {
            let _ = write!(s, "{:02x}", b);
        }
        s
    }
}

impl KernelCatalogue for Catalogue {
    fn lookup(&self, op_type: &str, backend: Backend) -> Option<&KernelTable> {
        self.tables
            .get(&(op_type.to_string(), backend))
            .map(|(t, _)| t)
    }

    fn precision_class(&self, op_type: &str) -> PrecisionClass {
        self.classes.get(op_type).copied().unwrap_or_default()
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
