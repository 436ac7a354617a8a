use crate::value::CanonicalValue;
use std::fmt;

/// A localized comparison failure: where in the document the two decoded
/// values disagree, and what each side held there.
///
/// `left`/`right` follow the argument order of [`compare`]; the oracle maps
/// them onto decoder names when it builds the divergence report.
#[derive(Debug, Clone, PartialEq)]
pub struct Mismatch {
    /// Dotted path from the document root, e.g. `dog."tater.man".type.name`
    /// or `contributors[1].email`. Empty for the root itself.
    pub path: String,
    /// Rendering of the left-hand value at `path` (or a key-set summary).
    pub left: String,
    /// Rendering of the right-hand value at `path`.
    pub right: String,
    /// Which equivalence rule failed.
    pub reason: &'static str,
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let at = if self.path.is_empty() {
            "document root".to_string()
        } else {
            format!("`{}`", self.path)
        };
        write!(
            f,
            "{} at {}: left is {}, right is {}",
            self.reason, at, self.left, self.right
        )
    }
}

/// Decides whether two canonical values represent the same logical document.
///
/// Tables compare order-insensitively on key sets, sequences compare in
/// order, scalars compare under kind-specific rules (exact integers, floats
/// with NaN and signed-zero equivalence, byte-exact strings, sub-variant +
/// normalized-text datetimes). Returns the first mismatch found; the search
/// order is deterministic (sorted keys, left-to-right elements), so
/// `compare(a, b)` and `compare(b, a)` fail at the same path or both pass.
pub fn compare(left: &CanonicalValue, right: &CanonicalValue) -> Result<(), Mismatch> {
    compare_at(left, right, String::new())
}

fn compare_at(left: &CanonicalValue, right: &CanonicalValue, path: String) -> Result<(), Mismatch> {
    use CanonicalValue::*;

    match (left, right) {
        (Table(lt), Table(rt)) => {
            // Key-set difference first, so a missing key reports as such
            // rather than as a mismatch on whichever key sorts first.
            for key in lt.keys() {
                if !rt.contains_key(key) {
                    return Err(Mismatch {
                        path,
                        left: format!("a table containing key {key:?}"),
                        right: "a table missing that key".to_string(),
                        reason: "table key sets differ",
                    });
                }
            }
            for key in rt.keys() {
                if !lt.contains_key(key) {
                    return Err(Mismatch {
                        path,
                        left: "a table missing that key".to_string(),
                        right: format!("a table containing key {key:?}"),
                        reason: "table key sets differ",
                    });
                }
            }
            for (key, lv) in lt {
                let rv = &rt[key];
                compare_at(lv, rv, join_key(&path, key))?;
            }
            Ok(())
        }
        (Seq(ls), Seq(rs)) => {
            if ls.len() != rs.len() {
                return Err(Mismatch {
                    path,
                    left: format!("an array of length {}", ls.len()),
                    right: format!("an array of length {}", rs.len()),
                    reason: "array lengths differ",
                });
            }
            for (index, (lv, rv)) in ls.iter().zip(rs).enumerate() {
                compare_at(lv, rv, format!("{path}[{index}]"))?;
            }
            Ok(())
        }
        (Bool(l), Bool(r)) if l == r => Ok(()),
        (Integer(l), Integer(r)) if l == r => Ok(()),
        (Float(l), Float(r)) if floats_equal(*l, *r) => Ok(()),
        (Str(l), Str(r)) if l == r => Ok(()),
        (
            Datetime { kind: lk, text: lt },
            Datetime { kind: rk, text: rt },
        ) if lk == rk && lt == rt => Ok(()),
        (l, r) if l.kind_name() != r.kind_name() => Err(Mismatch {
            path,
            left: format!("a {}", l.kind_name()),
            right: format!("a {}", r.kind_name()),
            reason: "value kinds differ",
        }),
        (l, r) => Err(Mismatch {
            path,
            left: render_scalar(l),
            right: render_scalar(r),
            reason: "scalar values differ",
        }),
    }
}

/// Exact float equality, except that all NaN encodings are one value and
/// the two zeros are indistinguishable (IEEE `==` already gives the latter).
fn floats_equal(left: f64, right: f64) -> bool {
    (left.is_nan() && right.is_nan()) || left == right
}

fn join_key(path: &str, key: &str) -> String {
    // Keys containing dots or spaces get quoted so the reported path stays
    // unambiguous, e.g. dog."tater.man".type.
    let needs_quotes = key.is_empty() || key.contains(['.', ' ', '"']);
    let rendered = if needs_quotes {
        format!("{key:?}")
    } else {
        key.to_string()
    };
    if path.is_empty() {
        rendered
    } else {
        format!("{path}.{rendered}")
    }
}

fn render_scalar(value: &CanonicalValue) -> String {
    match value {
        CanonicalValue::Bool(b) => b.to_string(),
        CanonicalValue::Integer(i) => i.to_string(),
        CanonicalValue::Float(f) => f.to_string(),
        CanonicalValue::Str(s) => format!("{s:?}"),
        CanonicalValue::Datetime { kind, text } => format!("{} {}", kind.as_str(), text),
        CanonicalValue::Seq(items) => format!("an array of length {}", items.len()),
        CanonicalValue::Table(table) => format!("a table with {} keys", table.len()),
    }
}
