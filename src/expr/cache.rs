use super::{parser, Mode, Program};
use crate::core::errors::{FlowError, Result};
use dashmap::DashMap;
use lazy_static::lazy_static;
use std::sync::Arc;
use tracing::debug;

const MAX_PROGRAMS: usize = 4096;

lazy_static! {
    static ref PROGRAMS: DashMap<(String, Mode), Arc<Program>> = DashMap::new();
}

/// Compile `source` for `mode`, reusing an earlier compilation when one is
/// cached. Parse failures are not cached.
pub fn compile(source: &str, mode: Mode) -> Result<Arc<Program>> {
    let key = (source.to_string(), mode);
    if let Some(program) = PROGRAMS.get(&key) {
        return Ok(program.value().clone());
    }

    let expr = parser::parse(source).map_err(|e| FlowError::expression(source, e.to_string()))?;
    let program = Arc::new(Program {
        source: source.to_string(),
        mode,
        expr,
    });

    if PROGRAMS.len() >= MAX_PROGRAMS {
        debug!(entries = PROGRAMS.len(), "expression cache full, clearing");
        PROGRAMS.clear();
    }
    PROGRAMS.insert(key, program.clone());
    Ok(program)
}

pub fn len() -> usize {
    PROGRAMS.len()
}

pub fn clear() {
    PROGRAMS.clear();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_source_and_mode_share_program() {
        let a = compile("cache_probe_a + 1", Mode::Any).unwrap();
        let b = compile("cache_probe_a + 1", Mode::Any).unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        let c = compile("cache_probe_a + 1", Mode::Bool).unwrap();
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[test]
    fn test_parse_errors_carry_source() {
        let err = compile("1 +", Mode::Any).unwrap_err();
        assert!(err.to_string().contains("'1 +'"));
    }
}
