//! Function shapes and their textual signatures.
//!
//! A signature is `name_` followed by each parameter as `Type_Mult` joined by
//! `__`, then `__` and the return `Type_Mult`, then a trailing `_`; a
//! function without parameters is `name__Ret_Mult_`. Types are written by
//! simple name, multiplicities with [`Multiplicity::signature_code`].

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::id::NodeId;
use crate::m3::{self, props};
use crate::multiplicity::Multiplicity;
use crate::store::InstanceStore;
use crate::value::PropertyValue;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterShape {
    pub name: String,
    /// Type path as written; may be a simple name.
    pub type_path: String,
    pub multiplicity: Multiplicity,
}

/// Parameters and return of a function node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionShape {
    pub name: String,
    pub parameters: Vec<ParameterShape>,
    pub return_type: String,
    pub return_multiplicity: Multiplicity,
}

impl FunctionShape {
    /// Read the shape of a function (or lambda) node from the graph.
    pub fn of(store: &InstanceStore, function: NodeId) -> Result<Self, CoreError> {
        let node = store.node(function)?;
        let mut parameters = Vec::new();
        for value in node.values(props::PARAMETERS) {
            let Some(param_id) = value.target() else {
                continue;
            };
            let param = store.node(param_id)?;
            parameters.push(ParameterShape {
                name: param.string(props::NAME).unwrap_or_default().to_string(),
                type_path: type_text(param.values(props::GENERIC_TYPE)),
                multiplicity: multiplicity_of(param.string(props::MULTIPLICITY), Multiplicity::PURE_ONE)?,
            });
        }
        Ok(FunctionShape {
            name: node.name().unwrap_or("lambda").to_string(),
            parameters,
            return_type: type_text(node.values(props::RETURN_TYPE)),
            return_multiplicity: multiplicity_of(
                node.string(props::RETURN_MULTIPLICITY),
                Multiplicity::ZERO_MANY,
            )?,
        })
    }

    pub fn signature(&self) -> String {
        let params: Vec<(&str, Multiplicity)> = self
            .parameters
            .iter()
            .map(|p| (p.type_path.as_str(), p.multiplicity))
            .collect();
        encode(&self.name, &params, (&self.return_type, self.return_multiplicity))
    }
}

/// Encode a signature from parts.
pub fn encode(
    name: &str,
    params: &[(&str, Multiplicity)],
    ret: (&str, Multiplicity),
) -> String {
    let part = |(ty, mult): (&str, Multiplicity)| {
        format!("{}_{}", m3::simple_name(ty), mult.signature_code())
    };
    let params: Vec<String> = params.iter().map(|p| part(*p)).collect();
    if params.is_empty() {
        format!("{name}__{}_", part(ret))
    } else {
        format!("{name}_{}__{}_", params.join("__"), part(ret))
    }
}

fn type_text(values: &[PropertyValue]) -> String {
    values
        .iter()
        .find_map(|v| v.as_stub().map(|s| s.path.clone()))
        .unwrap_or_else(|| m3::ANY.to_string())
}

fn multiplicity_of(text: Option<&str>, default: Multiplicity) -> Result<Multiplicity, CoreError> {
    text.map_or(Ok(default), str::parse)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_matches_platform_conventions() {
        assert_eq!(
            encode("not", &[("Boolean", Multiplicity::PURE_ONE)], ("Boolean", Multiplicity::PURE_ONE)),
            "not_Boolean_1__Boolean_1_"
        );
        assert_eq!(
            encode(
                "times",
                &[("Number", Multiplicity::ZERO_MANY)],
                ("Number", Multiplicity::PURE_ONE)
            ),
            "times_Number_MANY__Number_1_"
        );
        assert_eq!(
            encode("f", &[], ("Boolean", Multiplicity::PURE_ONE)),
            "f__Boolean_1_"
        );
        assert_eq!(
            encode(
                "first",
                &[(m3::ANY, Multiplicity::ZERO_MANY)],
                (m3::ANY, Multiplicity::ZERO_ONE)
            ),
            "first_Any_MANY__Any_$0_1$_"
        );
    }
}
