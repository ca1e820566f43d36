//! Call signatures
//!
//! A [`Signature`] describes the host-visible parameters of a bound
//! callable: one [`ParamKind`] per parameter plus how many trailing
//! parameters have defaults. It compiles to the VM's [`ParamsCheck`], which
//! rejects wrong argument counts and kinds before host code runs.
//!
//! The receiver is not part of the descriptor. The VM counts it, so both
//! arity bounds are shifted by one and its kind is prepended to the mask.

use squire_vm::{ParamKind, ParamsCheck};

use crate::error::{Error, Result};

/// Parameter kinds and default count of a bound callable
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    receiver: ParamKind,
    params: Vec<ParamKind>,
    defaults: usize,
}

impl Signature {
    /// Signature of a free function (any receiver)
    pub fn function(params: Vec<ParamKind>) -> Self {
        Self {
            receiver: ParamKind::Any,
            params,
            defaults: 0,
        }
    }

    /// Signature of a method or constructor (instance receiver)
    pub fn method(params: Vec<ParamKind>) -> Self {
        Self {
            receiver: ParamKind::Instance,
            params,
            defaults: 0,
        }
    }

    /// Declare how many trailing parameters have defaults
    pub fn with_defaults(mut self, defaults: usize) -> Result<Self> {
        if defaults > self.params.len() {
            return Err(Error::Binding(format!(
                "{} default values given for {} parameters",
                defaults,
                self.params.len()
            )));
        }
        self.defaults = defaults;
        Ok(self)
    }

    /// Number of declared parameters
    pub fn total(&self) -> usize {
        self.params.len()
    }

    /// Number of trailing parameters with defaults
    pub fn defaults(&self) -> usize {
        self.defaults
    }

    /// Fewest arguments a caller may supply
    pub fn min_arity(&self) -> usize {
        self.params.len() - self.defaults
    }

    /// Most arguments a caller may supply
    pub fn max_arity(&self) -> usize {
        self.params.len()
    }

    /// Parameter descriptor, one symbol per parameter (receiver excluded)
    pub fn descriptor(&self) -> String {
        self.params.iter().map(|k| k.symbol()).collect()
    }

    /// The VM-side check for this signature
    pub fn params_check(&self) -> Result<ParamsCheck> {
        let mut mask = String::with_capacity(self.params.len() + 1);
        mask.push(self.receiver.symbol());
        mask.push_str(&self.descriptor());
        Ok(ParamsCheck::new(
            self.min_arity() + 1,
            self.max_arity() + 1,
            &mask,
        )?)
    }
}
