// framework.rs — Vocabulary of the runtime actor framework
//
// Generated classes extend and call into a fixed runtime library. This module
// is the single place that names its classes and methods, so every pass
// recognizes a call by comparing against the same `MethodRef`.
//
// Preconditions: none.
// Postconditions: none (constant tables and constructors).
// Failure modes: none.
// Side effects: none.

use crate::ir::{MethodRef, Type};

/// Token and type-descriptor classes.
pub mod data {
    pub const TOKEN: &str = "rt.data.Token";
    pub const SCALAR_TOKEN: &str = "rt.data.ScalarToken";
    pub const BOOLEAN_TOKEN: &str = "rt.data.BooleanToken";
    pub const UNSIGNED_BYTE_TOKEN: &str = "rt.data.UnsignedByteToken";
    pub const INT_TOKEN: &str = "rt.data.IntToken";
    pub const LONG_TOKEN: &str = "rt.data.LongToken";
    pub const DOUBLE_TOKEN: &str = "rt.data.DoubleToken";
    pub const COMPLEX_TOKEN: &str = "rt.data.ComplexToken";
    pub const FIX_TOKEN: &str = "rt.data.FixToken";
    pub const STRING_TOKEN: &str = "rt.data.StringToken";
    pub const ARRAY_TOKEN: &str = "rt.data.ArrayToken";
    pub const MATRIX_TOKEN: &str = "rt.data.MatrixToken";
    pub const BOOLEAN_MATRIX_TOKEN: &str = "rt.data.BooleanMatrixToken";
    pub const INT_MATRIX_TOKEN: &str = "rt.data.IntMatrixToken";
    pub const LONG_MATRIX_TOKEN: &str = "rt.data.LongMatrixToken";
    pub const DOUBLE_MATRIX_TOKEN: &str = "rt.data.DoubleMatrixToken";
    pub const COMPLEX_MATRIX_TOKEN: &str = "rt.data.ComplexMatrixToken";
    pub const FIX_MATRIX_TOKEN: &str = "rt.data.FixMatrixToken";
    pub const RECORD_TOKEN: &str = "rt.data.RecordToken";
    pub const FUNCTION_TOKEN: &str = "rt.data.FunctionToken";
    pub const TYPE_LATTICE: &str = "rt.data.type.TypeLattice";
    pub const COMPLEX: &str = "rt.math.Complex";
    pub const FIX_POINT: &str = "rt.math.FixPoint";
    pub const UTILITY_FUNCTIONS: &str = "rt.data.expr.UtilityFunctions";
    pub const MATH: &str = "java.lang.Math";
}

/// Model-structure classes.
pub mod kernel {
    pub const OBJECT: &str = "java.lang.Object";
    pub const NAMED_OBJ: &str = "rt.kernel.util.NamedObj";
    pub const ATTRIBUTE: &str = "rt.kernel.util.Attribute";
    pub const STRING_ATTRIBUTE: &str = "rt.kernel.util.StringAttribute";
    pub const VARIABLE: &str = "rt.data.expr.Variable";
    pub const PARAMETER: &str = "rt.data.expr.Parameter";
    pub const PORT_PARAMETER: &str = "rt.actor.parameters.PortParameter";
    pub const ENTITY: &str = "rt.kernel.Entity";
    pub const COMPOSITE_ENTITY: &str = "rt.kernel.CompositeEntity";
    pub const ATOMIC_ACTOR: &str = "rt.actor.TypedAtomicActor";
    pub const COMPOSITE_ACTOR: &str = "rt.actor.TypedCompositeActor";
    pub const PORT: &str = "rt.actor.TypedIOPort";
    pub const PARAMETER_PORT: &str = "rt.actor.parameters.ParameterPort";
    pub const RELATION: &str = "rt.actor.TypedIORelation";
    pub const DIRECTOR: &str = "rt.actor.Director";
    pub const SDF_DIRECTOR: &str = "rt.domains.sdf.kernel.SDFDirector";
    pub const RUNTIME_EXCEPTION: &str = "java.lang.RuntimeException";
}

/// Direct superclass of a runtime class, if it is one the specializer knows.
pub fn superclass(class: &str) -> Option<&'static str> {
    use data::*;
    use kernel::*;
    let parent = match class {
        NAMED_OBJ => OBJECT,
        ATTRIBUTE => NAMED_OBJ,
        STRING_ATTRIBUTE => ATTRIBUTE,
        VARIABLE => ATTRIBUTE,
        PARAMETER => VARIABLE,
        PORT_PARAMETER => PARAMETER,
        DIRECTOR => ATTRIBUTE,
        SDF_DIRECTOR => DIRECTOR,
        ENTITY => NAMED_OBJ,
        COMPOSITE_ENTITY => ENTITY,
        ATOMIC_ACTOR => ENTITY,
        COMPOSITE_ACTOR => COMPOSITE_ENTITY,
        "rt.kernel.Port" => NAMED_OBJ,
        PORT => "rt.kernel.Port",
        PARAMETER_PORT => PORT,
        RELATION => NAMED_OBJ,
        TOKEN => OBJECT,
        SCALAR_TOKEN => TOKEN,
        UNSIGNED_BYTE_TOKEN | INT_TOKEN | LONG_TOKEN | DOUBLE_TOKEN | COMPLEX_TOKEN
        | FIX_TOKEN => SCALAR_TOKEN,
        BOOLEAN_TOKEN | STRING_TOKEN | ARRAY_TOKEN | RECORD_TOKEN | FUNCTION_TOKEN => TOKEN,
        MATRIX_TOKEN => TOKEN,
        BOOLEAN_MATRIX_TOKEN | INT_MATRIX_TOKEN | LONG_MATRIX_TOKEN | DOUBLE_MATRIX_TOKEN
        | COMPLEX_MATRIX_TOKEN | FIX_MATRIX_TOKEN => MATRIX_TOKEN,
        _ => return None,
    };
    Some(parent)
}

/// Subclass test over the runtime hierarchy only.
pub fn is_runtime_subclass(class: &str, ancestor: &str) -> bool {
    let mut current = class;
    loop {
        if current == ancestor {
            return true;
        }
        match superclass(current) {
            Some(parent) => current = parent,
            None => return false,
        }
    }
}

/// True for token and type-descriptor classes, whose constructors and
/// methods have no observable side effects.
pub fn is_value_class(class: &str) -> bool {
    class == data::TYPE_LATTICE || is_runtime_subclass(class, data::TOKEN)
}

/// True when a call to `method` can be deleted if its result is unused.
pub fn is_side_effect_free(method: &MethodRef) -> bool {
    if is_value_class(&method.class) {
        return true;
    }
    if method.class == data::MATH || method.class == data::UTILITY_FUNCTIONS {
        return true;
    }
    // Pure structure queries.
    matches!(
        method.name.as_str(),
        "getContainer"
            | "getAttribute"
            | "getPort"
            | "getEntity"
            | "getRelation"
            | "getName"
            | "getFullName"
            | "getExpression"
            | "getToken"
            | "hasToken"
    )
}

/// Editor-only calls on settable attributes. They have no effect on values.
pub fn is_cosmetic(method: &MethodRef) -> bool {
    matches!(
        method.name.as_str(),
        "setVisibility" | "setPersistent" | "validate" | "setDisplayName"
    )
}

// ── Method references ──

fn obj(class: &str) -> Type {
    Type::object(class)
}

pub fn token_type() -> Type {
    obj(data::TOKEN)
}

pub fn init(class: &str, params: Vec<Type>) -> MethodRef {
    MethodRef::new(class, "<init>", params, Type::Void)
}

/// `<init>(container, name)` used by every runtime structure class.
pub fn structural_init(class: &str) -> MethodRef {
    init(class, vec![obj(kernel::NAMED_OBJ), Type::String])
}

pub fn get_container() -> MethodRef {
    MethodRef::new(kernel::NAMED_OBJ, "getContainer", vec![], obj(kernel::NAMED_OBJ))
}

pub fn get_attribute() -> MethodRef {
    MethodRef::new(
        kernel::NAMED_OBJ,
        "getAttribute",
        vec![Type::String],
        obj(kernel::ATTRIBUTE),
    )
}

pub fn get_port() -> MethodRef {
    MethodRef::new(kernel::ENTITY, "getPort", vec![Type::String], obj(kernel::PORT))
}

/// `PortParameter.getPort()`: the port a port-parameter created.
pub fn get_parameter_port() -> MethodRef {
    MethodRef::new(
        kernel::PORT_PARAMETER,
        "getPort",
        vec![],
        obj(kernel::PARAMETER_PORT),
    )
}

pub fn get_entity() -> MethodRef {
    MethodRef::new(
        kernel::COMPOSITE_ENTITY,
        "getEntity",
        vec![Type::String],
        obj(kernel::ENTITY),
    )
}

pub fn get_relation() -> MethodRef {
    MethodRef::new(
        kernel::COMPOSITE_ENTITY,
        "getRelation",
        vec![Type::String],
        obj(kernel::RELATION),
    )
}

/// `TypedIOPort(container, name, isInput, isOutput)`.
pub fn port_init() -> MethodRef {
    init(
        kernel::PORT,
        vec![obj(kernel::NAMED_OBJ), Type::String, Type::Boolean, Type::Boolean],
    )
}

pub fn set_multiport() -> MethodRef {
    MethodRef::new(kernel::PORT, "setMultiport", vec![Type::Boolean], Type::Void)
}

pub fn set_name() -> MethodRef {
    MethodRef::new(kernel::NAMED_OBJ, "setName", vec![Type::String], Type::Void)
}

pub fn link() -> MethodRef {
    MethodRef::new(kernel::PORT, "link", vec![obj(kernel::RELATION)], Type::Void)
}

pub fn port_get() -> MethodRef {
    MethodRef::new(kernel::PORT, "get", vec![Type::Int], token_type())
}

pub fn port_send() -> MethodRef {
    MethodRef::new(
        kernel::PORT,
        "send",
        vec![Type::Int, token_type()],
        Type::Void,
    )
}

pub fn port_has_token() -> MethodRef {
    MethodRef::new(kernel::PORT, "hasToken", vec![Type::Int], Type::Boolean)
}

pub fn get_token() -> MethodRef {
    MethodRef::new(kernel::VARIABLE, "getToken", vec![], token_type())
}

pub fn set_token() -> MethodRef {
    MethodRef::new(kernel::VARIABLE, "setToken", vec![token_type()], Type::Void)
}

pub fn get_expression() -> MethodRef {
    MethodRef::new(kernel::ATTRIBUTE, "getExpression", vec![], Type::String)
}

pub fn set_expression() -> MethodRef {
    MethodRef::new(
        kernel::ATTRIBUTE,
        "setExpression",
        vec![Type::String],
        Type::Void,
    )
}

pub fn set_visibility() -> MethodRef {
    MethodRef::new(kernel::ATTRIBUTE, "setVisibility", vec![Type::Int], Type::Void)
}

pub fn set_persistent() -> MethodRef {
    MethodRef::new(
        kernel::ATTRIBUTE,
        "setPersistent",
        vec![Type::Boolean],
        Type::Void,
    )
}

pub fn attribute_changed(class: &str) -> MethodRef {
    MethodRef::new(
        class,
        "attributeChanged",
        vec![obj(kernel::ATTRIBUTE)],
        Type::Void,
    )
}

// ── Lifecycle ──

pub const LIFECYCLE: [(&str, Type); 6] = [
    ("preinitialize", Type::Void),
    ("initialize", Type::Void),
    ("prefire", Type::Boolean),
    ("fire", Type::Void),
    ("postfire", Type::Boolean),
    ("wrapup", Type::Void),
];

pub fn lifecycle(class: &str, name: &str) -> MethodRef {
    let ret = LIFECYCLE
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, t)| t.clone())
        .unwrap_or(Type::Void);
    MethodRef::new(class, name, vec![], ret)
}

// ── Token operations ──

/// A method on a token class.
pub fn token_method(class: &str, name: &str, params: Vec<Type>, ret: Type) -> MethodRef {
    MethodRef::new(class, name, params, ret)
}

/// Binary token arithmetic: `add`, `subtract`, `multiply`, `divide`, `modulo`,
/// and the bitwise family.
pub fn token_binary(name: &str) -> MethodRef {
    token_method(data::TOKEN, name, vec![token_type()], token_type())
}

pub fn is_equal_to() -> MethodRef {
    token_method(
        data::TOKEN,
        "isEqualTo",
        vec![token_type()],
        obj(data::BOOLEAN_TOKEN),
    )
}

pub fn is_less_than() -> MethodRef {
    token_method(
        data::SCALAR_TOKEN,
        "isLessThan",
        vec![obj(data::SCALAR_TOKEN)],
        obj(data::BOOLEAN_TOKEN),
    )
}

pub fn token_unary(class: &str, name: &str) -> MethodRef {
    token_method(class, name, vec![], token_type())
}

/// `leftShift(int)`, `rightShift(int)`, `logicalRightShift(int)`, `pow(int)`.
pub fn token_int_arg(class: &str, name: &str) -> MethodRef {
    token_method(class, name, vec![Type::Int], token_type())
}

pub fn array_get_element() -> MethodRef {
    token_method(data::ARRAY_TOKEN, "getElement", vec![Type::Int], token_type())
}

pub fn array_value() -> MethodRef {
    token_method(
        data::ARRAY_TOKEN,
        "arrayValue",
        vec![],
        Type::array_of(token_type()),
    )
}

pub fn matrix_get_element() -> MethodRef {
    token_method(
        data::MATRIX_TOKEN,
        "getElementAsToken",
        vec![Type::Int, Type::Int],
        token_type(),
    )
}

/// Static `arrayToMatrix(Token[], rows, cols)` on a concrete matrix class.
pub fn array_to_matrix(class: &str) -> MethodRef {
    token_method(
        class,
        "arrayToMatrix",
        vec![Type::array_of(token_type()), Type::Int, Type::Int],
        obj(class),
    )
}

pub fn record_get() -> MethodRef {
    token_method(data::RECORD_TOKEN, "get", vec![Type::String], token_type())
}

pub fn function_apply() -> MethodRef {
    token_method(
        data::FUNCTION_TOKEN,
        "apply",
        vec![Type::array_of(token_type())],
        token_type(),
    )
}

/// Native-value accessor such as `intValue()` on `class`.
pub fn accessor(class: &str, name: &str, ret: Type) -> MethodRef {
    token_method(class, name, vec![], ret)
}

/// Static `convert(Token)` on a token class, used for declared-type widening.
pub fn token_convert(class: &str) -> MethodRef {
    token_method(class, "convert", vec![token_type()], obj(class))
}

pub fn type_lattice_compare() -> MethodRef {
    MethodRef::new(
        data::TYPE_LATTICE,
        "compare",
        vec![token_type(), token_type()],
        Type::Int,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_hierarchy() {
        assert!(is_runtime_subclass(data::INT_TOKEN, data::SCALAR_TOKEN));
        assert!(is_runtime_subclass(data::DOUBLE_MATRIX_TOKEN, data::TOKEN));
        assert!(!is_runtime_subclass(data::ARRAY_TOKEN, data::SCALAR_TOKEN));
    }

    #[test]
    fn structure_hierarchy() {
        assert!(is_runtime_subclass(kernel::PORT_PARAMETER, kernel::VARIABLE));
        assert!(is_runtime_subclass(kernel::COMPOSITE_ACTOR, kernel::ENTITY));
        assert!(!is_runtime_subclass(kernel::PORT, kernel::ATTRIBUTE));
    }

    #[test]
    fn token_calls_are_pure_and_structure_mutations_are_not() {
        assert!(is_side_effect_free(&token_binary("add")));
        assert!(is_side_effect_free(&type_lattice_compare()));
        assert!(is_side_effect_free(&get_attribute()));
        assert!(!is_side_effect_free(&set_token()));
        assert!(!is_side_effect_free(&port_send()));
        assert!(!is_side_effect_free(&link()));
    }
}
