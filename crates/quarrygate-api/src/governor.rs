//! Complexity governor: rejects a request whose computed cost exceeds
//! the caller's per-role ceiling.

use quarrygate_common::GatewayError;
use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct ComplexityCeilings {
    by_role: HashMap<String, f64>,
    default_ceiling: f64,
}

impl ComplexityCeilings {
    pub fn new(default_ceiling: f64) -> Self {
        Self { by_role: HashMap::new(), default_ceiling }
    }

    pub fn with_role(mut self, role: impl Into<String>, ceiling: f64) -> Self {
        self.by_role.insert(role.into(), ceiling);
        self
    }

    pub fn ceiling_for(&self, role: &str) -> f64 {
        self.by_role.get(role).copied().unwrap_or(self.default_ceiling)
    }

    pub fn check(&self, role: &str, cost: f64) -> Result<(), GatewayError> {
        let ceiling = self.ceiling_for(role);
        if cost > ceiling {
            return Err(GatewayError::ComplexityExceeded(format!(
                "request cost {cost:.1} exceeds the ceiling of {ceiling:.1} for role '{role}'"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_specific_ceiling_overrides_default() {
        let ceilings = ComplexityCeilings::new(50.0).with_role("admin", 500.0);
        assert!(ceilings.check("viewer", 60.0).is_err());
        assert!(ceilings.check("admin", 60.0).is_ok());
    }
}
