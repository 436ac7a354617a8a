use rand_core::RngCore;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// File extension the conformance-tree walk admits.
const CORPUS_EXTENSION: &str = "toml";

/// Hand-authored edge-case documents, always seeded regardless of whether an
/// external conformance tree is available: quoted/dotted/Unicode keys, inline
/// tables, array-of-tables, escape sequences, numeric literal edge forms,
/// date-time shapes, special float keywords, and several malformed inputs.
pub const SEED_LITERALS: &[&str] = &[
    "[dog.\"tater.man\"]\n\ttype.name = \"pug\"",
    "[ j . \"\u{029e}\" . 'l' ]",
    "[[a.b]]\n\ta='b'",
    "[table]\nhello = 'world'",
    "a=1979-05-27T00:32:00-07:00",
    "a={f=\"1\",b.c=3}",
    "a=\"\\\\\\n\\t\\\"\"",
    "a. b=\"c\"",
    "'\"a\"' = 1",
    "\"\\\"b\\\"\" = 2",
    "A = \"\"\"\\\n\t\t\tTest\"\"\"",
    "a=1z=2",
    "a=\"Name\\tJos\\u00E9\\nLoc\\tSF.\"",
    "contributors = [\n  \"Foo Bar <foo@example.com>\",\n  { name = \"Baz Qux\", email = \"bazqux@example.com\", url = \"https://example.com/bazqux\" }\n]",
    "foo = 2021-04-08",
    "a=20x1-05-21",
    "a=1_",
    "a=0bfa",
    "a=0o62",
    "a=true",
    "a=false",
    "a=1__2",
    "a=4e+9",
    "a=-4e-2",
    "a=inf",
    "a=+inf",
    "a=-inf",
    "a=nan",
    "a=+nan",
    "a=-nan",
    "a=[1, 2, \"b\"]",
];

/// Conformance-tree entries known to be unreliable, excluded from seeding.
/// Paths are relative to the tree root.
pub const DEFAULT_DENYLIST: &[&str] = &[
    "invalid/table/injection-1.toml",
    "invalid/table/injection-2.toml",
];

/// Errors raised while building or reading the corpus.
#[derive(Error, Debug)]
pub enum CorpusError {
    /// The conformance-tree root is missing or not a directory.
    #[error("corpus tree root {0:?} is not a readable directory")]
    BadTreeRoot(PathBuf),

    /// An I/O failure while walking the tree or reading an entry.
    #[error("corpus I/O error at {path:?}: {detail}")]
    Io { path: PathBuf, detail: String },
}

/// One candidate input plus a description of where it came from.
#[derive(Debug, Clone)]
pub struct CorpusEntry {
    pub data: Vec<u8>,
    /// Human-readable origin: `seed literal #7` or the tree-relative path.
    pub source: String,
}

/// The round-driving input collection: literal seeds plus, optionally, a
/// bulk import of an external conformance-test tree.
///
/// Entries are held in memory in insertion order. `iter()` hands out a
/// lazy, restartable view so an external exploration driver can replay or
/// sample the corpus without copying it.
#[derive(Debug, Default)]
pub struct SeedCorpus {
    entries: Vec<CorpusEntry>,
}

impl SeedCorpus {
    /// Creates an empty corpus. Most callers want [`SeedCorpus::with_literals`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a corpus pre-populated with [`SEED_LITERALS`].
    pub fn with_literals() -> Self {
        let mut corpus = Self::new();
        for (index, literal) in SEED_LITERALS.iter().enumerate() {
            corpus.add(
                literal.as_bytes().to_vec(),
                format!("seed literal #{index}"),
            );
        }
        corpus
    }

    pub fn add(&mut self, data: Vec<u8>, source: impl Into<String>) -> usize {
        let id = self.entries.len();
        self.entries.push(CorpusEntry {
            data,
            source: source.into(),
        });
        id
    }

    pub fn get(&self, id: usize) -> Option<&CorpusEntry> {
        self.entries.get(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Restartable pass over all entries, in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &CorpusEntry> {
        self.entries.iter()
    }

    /// Uniform random pick, for drivers that sample instead of replaying.
    pub fn random_select(&self, rng: &mut dyn RngCore) -> Option<(usize, &CorpusEntry)> {
        if self.entries.is_empty() {
            return None;
        }
        let index = rng.next_u64() as usize % self.entries.len();
        self.entries.get(index).map(|entry| (index, entry))
    }

    /// Recursively imports every `.toml` file under `root` (the
    /// valid/invalid partition is a path convention inside the tree, not
    /// something the walk interprets), skipping `denylist` entries given as
    /// tree-relative paths. Returns the number of entries loaded.
    pub fn load_tree(&mut self, root: &Path, denylist: &[String]) -> Result<usize, CorpusError> {
        if !root.is_dir() {
            return Err(CorpusError::BadTreeRoot(root.to_path_buf()));
        }

        // Explicit stack instead of recursion; directory entries are sorted
        // so a run seeds in a stable order.
        let mut loaded = 0;
        let mut pending = vec![root.to_path_buf()];
        while let Some(dir) = pending.pop() {
            let mut children: Vec<PathBuf> = fs::read_dir(&dir)
                .map_err(|e| CorpusError::Io {
                    path: dir.clone(),
                    detail: e.to_string(),
                })?
                .map(|entry| entry.map(|e| e.path()))
                .collect::<Result<_, _>>()
                .map_err(|e| CorpusError::Io {
                    path: dir.clone(),
                    detail: e.to_string(),
                })?;
            children.sort();

            for child in children {
                if child.is_dir() {
                    pending.push(child);
                    continue;
                }
                if child.extension().and_then(|e| e.to_str()) != Some(CORPUS_EXTENSION) {
                    continue;
                }
                let relative = child
                    .strip_prefix(root)
                    .unwrap_or(&child)
                    .to_string_lossy()
                    .into_owned();
                if denylist.iter().any(|denied| *denied == relative) {
                    continue;
                }
                let data = fs::read(&child).map_err(|e| CorpusError::Io {
                    path: child.clone(),
                    detail: e.to_string(),
                })?;
                self.add(data, relative);
                loaded += 1;
            }
        }
        Ok(loaded)
    }
}
