use crate::abi::AccountRef;
use crate::state::StateSnapshot;

/// User-supplied property over post-call state. Evaluated after every
/// accepted call with the acting account and the freshly reloaded state; a
/// `false` result ends the campaign with the dispatched candidate as the
/// counterexample.
///
/// When no oracle is installed the campaign runs in assertion mode: the
/// absence of a backend assertion failure is itself the passing condition.
pub trait Oracle {
    fn evaluate(&self, sender: &AccountRef, state: &StateSnapshot) -> bool;
}

/// Adapter for plain closures.
pub struct FnOracle<F>(F);

impl<F> FnOracle<F>
where
    F: Fn(&AccountRef, &StateSnapshot) -> bool,
{
    pub fn new(property: F) -> Self {
        Self(property)
    }
}

impl<F> Oracle for FnOracle<F>
where
    F: Fn(&AccountRef, &StateSnapshot) -> bool,
{
    fn evaluate(&self, sender: &AccountRef, state: &StateSnapshot) -> bool {
        (self.0)(sender, state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Scalar;

    #[test]
    fn fn_oracle_sees_account_and_state() {
        let oracle = FnOracle::new(|sender: &AccountRef, state: &StateSnapshot| {
            sender.0 == "ADDR1" && state.exists_global("initialized")
        });

        let mut state = StateSnapshot::default();
        let addr1 = AccountRef("ADDR1".to_string());
        assert!(!oracle.evaluate(&addr1, &state));

        state
            .global
            .insert("initialized".to_string(), Scalar::Uint(1));
        assert!(oracle.evaluate(&addr1, &state));
        assert!(!oracle.evaluate(&AccountRef("ADDR2".to_string()), &state));
    }
}
