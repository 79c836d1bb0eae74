//! Standard-library native function declarations.
//!
//! Each declaration becomes a persistent `NativeFunction` node at bootstrap.
//! Execution backends key their implementations by the signature text, and
//! must cover every signature listed in [`ALL`] before they can load.

/// A declared parameter: name, type path, multiplicity text.
pub type ParamDecl = (&'static str, &'static str, &'static str);

#[derive(Debug, Clone, Copy)]
pub struct NativeDecl {
    pub package: &'static str,
    pub name: &'static str,
    pub params: &'static [ParamDecl],
    pub return_type: &'static str,
    pub return_multiplicity: &'static str,
}

const BOOLEAN_PKG: &str = "meta::pure::functions::boolean";
const MATH_PKG: &str = "meta::pure::functions::math";
const COLLECTION_PKG: &str = "meta::pure::functions::collection";
const MULTIPLICITY_PKG: &str = "meta::pure::functions::multiplicity";
const STRING_PKG: &str = "meta::pure::functions::string";
const LANG_PKG: &str = "meta::pure::functions::lang";
const IO_PKG: &str = "meta::pure::functions::io";

const FUNCTION_TYPE: &str = crate::m3::FUNCTION;
const ANY: &str = crate::m3::ANY;

pub const NOT: &str = "not_Boolean_1__Boolean_1_";
pub const AND: &str = "and_Boolean_1__Boolean_1__Boolean_1_";
pub const OR: &str = "or_Boolean_1__Boolean_1__Boolean_1_";
pub const EQ: &str = "eq_Any_1__Any_1__Boolean_1_";
pub const PLUS: &str = "plus_Number_MANY__Number_1_";
pub const MINUS: &str = "minus_Number_MANY__Number_1_";
pub const TIMES: &str = "times_Number_MANY__Number_1_";
pub const DIVIDE: &str = "divide_Number_1__Number_1__Float_1_";
pub const LESS_THAN: &str = "lessThan_Number_1__Number_1__Boolean_1_";
pub const SIZE: &str = "size_Any_MANY__Integer_1_";
pub const IS_EMPTY: &str = "isEmpty_Any_MANY__Boolean_1_";
pub const FIRST: &str = "first_Any_MANY__Any_$0_1$_";
pub const TO_ONE: &str = "toOne_Any_MANY__Any_1_";
pub const JOIN_STRINGS: &str = "joinStrings_String_MANY__String_1__String_1_";
pub const TO_STRING: &str = "toString_Any_1__String_1_";
pub const IF: &str = "if_Boolean_1__Function_1__Function_1__Any_MANY_";
pub const LET: &str = "letFunction_String_1__Any_MANY__Any_MANY_";
pub const PRINT: &str = "print_Any_MANY__Integer_1__Nothing_0_";

/// Every standard-library signature.
pub const ALL: &[&str] = &[
    NOT, AND, OR, EQ, PLUS, MINUS, TIMES, DIVIDE, LESS_THAN, SIZE, IS_EMPTY, FIRST, TO_ONE,
    JOIN_STRINGS, TO_STRING, IF, LET, PRINT,
];

pub const NATIVES: &[NativeDecl] = &[
    NativeDecl {
        package: BOOLEAN_PKG,
        name: "not",
        params: &[("value", "Boolean", "1")],
        return_type: "Boolean",
        return_multiplicity: "1",
    },
    NativeDecl {
        package: BOOLEAN_PKG,
        name: "and",
        params: &[("left", "Boolean", "1"), ("right", "Boolean", "1")],
        return_type: "Boolean",
        return_multiplicity: "1",
    },
    NativeDecl {
        package: BOOLEAN_PKG,
        name: "or",
        params: &[("left", "Boolean", "1"), ("right", "Boolean", "1")],
        return_type: "Boolean",
        return_multiplicity: "1",
    },
    NativeDecl {
        package: BOOLEAN_PKG,
        name: "eq",
        params: &[("left", ANY, "1"), ("right", ANY, "1")],
        return_type: "Boolean",
        return_multiplicity: "1",
    },
    NativeDecl {
        package: MATH_PKG,
        name: "plus",
        params: &[("values", "Number", "*")],
        return_type: "Number",
        return_multiplicity: "1",
    },
    NativeDecl {
        package: MATH_PKG,
        name: "minus",
        params: &[("values", "Number", "*")],
        return_type: "Number",
        return_multiplicity: "1",
    },
    NativeDecl {
        package: MATH_PKG,
        name: "times",
        params: &[("values", "Number", "*")],
        return_type: "Number",
        return_multiplicity: "1",
    },
    NativeDecl {
        package: MATH_PKG,
        name: "divide",
        params: &[("left", "Number", "1"), ("right", "Number", "1")],
        return_type: "Float",
        return_multiplicity: "1",
    },
    NativeDecl {
        package: MATH_PKG,
        name: "lessThan",
        params: &[("left", "Number", "1"), ("right", "Number", "1")],
        return_type: "Boolean",
        return_multiplicity: "1",
    },
    NativeDecl {
        package: COLLECTION_PKG,
        name: "size",
        params: &[("values", ANY, "*")],
        return_type: "Integer",
        return_multiplicity: "1",
    },
    NativeDecl {
        package: COLLECTION_PKG,
        name: "isEmpty",
        params: &[("values", ANY, "*")],
        return_type: "Boolean",
        return_multiplicity: "1",
    },
    NativeDecl {
        package: COLLECTION_PKG,
        name: "first",
        params: &[("values", ANY, "*")],
        return_type: ANY,
        return_multiplicity: "0..1",
    },
    NativeDecl {
        package: MULTIPLICITY_PKG,
        name: "toOne",
        params: &[("values", ANY, "*")],
        return_type: ANY,
        return_multiplicity: "1",
    },
    NativeDecl {
        package: STRING_PKG,
        name: "joinStrings",
        params: &[("strings", "String", "*"), ("separator", "String", "1")],
        return_type: "String",
        return_multiplicity: "1",
    },
    NativeDecl {
        package: STRING_PKG,
        name: "toString",
        params: &[("value", ANY, "1")],
        return_type: "String",
        return_multiplicity: "1",
    },
    NativeDecl {
        package: LANG_PKG,
        name: "if",
        params: &[
            ("test", "Boolean", "1"),
            ("then", FUNCTION_TYPE, "1"),
            ("else", FUNCTION_TYPE, "1"),
        ],
        return_type: ANY,
        return_multiplicity: "*",
    },
    NativeDecl {
        package: LANG_PKG,
        name: "letFunction",
        params: &[("name", "String", "1"), ("value", ANY, "*")],
        return_type: ANY,
        return_multiplicity: "*",
    },
    NativeDecl {
        package: IO_PKG,
        name: "print",
        params: &[("value", ANY, "*"), ("depth", "Integer", "1")],
        return_type: crate::m3::NOTHING,
        return_multiplicity: "0",
    },
];
