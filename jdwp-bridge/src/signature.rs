// VM type signature codec
//
// Field descriptors: Z B C D F I J S V, Lpkg/Name; and [<component>.
// Method descriptors: (<params>)<return>.

use crate::native::{JavaType, LocalType};
use crate::protocol::{ProtocolError, ProtocolResult};
use crate::types::TypeTag;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("empty signature")]
    Empty,

    #[error("unrecognized signature character {0:?} in {1:?}")]
    UnknownTag(char, String),

    #[error("malformed signature {0:?}")]
    Malformed(String),
}

impl From<SignatureError> for ProtocolError {
    fn from(_: SignatureError) -> Self {
        ProtocolError::Internal
    }
}

/// A fully parsed field type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JvmType {
    Boolean,
    Byte,
    Char,
    Short,
    Int,
    Long,
    Float,
    Double,
    Void,
    /// Class name in internal form, e.g. `java/lang/String`
    Object(String),
    Array(Box<JvmType>),
}

impl JvmType {
    pub fn tag(&self) -> TypeTag {
        match self {
            JvmType::Boolean => TypeTag::Boolean,
            JvmType::Byte => TypeTag::Byte,
            JvmType::Char => TypeTag::Char,
            JvmType::Short => TypeTag::Short,
            JvmType::Int => TypeTag::Int,
            JvmType::Long => TypeTag::Long,
            JvmType::Float => TypeTag::Float,
            JvmType::Double => TypeTag::Double,
            JvmType::Void => TypeTag::Void,
            JvmType::Object(_) => TypeTag::Object,
            JvmType::Array(_) => TypeTag::Array,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodSignature {
    pub parameters: Vec<JvmType>,
    pub return_type: JvmType,
}

/// Classify a signature by its first character
pub fn decode_tag(signature: &str) -> Result<TypeTag, SignatureError> {
    let first = signature.chars().next().ok_or(SignatureError::Empty)?;
    let tag = match first {
        'Z' => TypeTag::Boolean,
        'B' => TypeTag::Byte,
        'C' => TypeTag::Char,
        'D' => TypeTag::Double,
        'F' => TypeTag::Float,
        'I' => TypeTag::Int,
        'J' => TypeTag::Long,
        'S' => TypeTag::Short,
        'V' => TypeTag::Void,
        'L' => TypeTag::Object,
        '[' => TypeTag::Array,
        other => return Err(SignatureError::UnknownTag(other, signature.to_string())),
    };
    Ok(tag)
}

/// The JNI getter to use for a value of this signature tag.
/// `void` is never a value type.
pub fn value_getter(tag: TypeTag) -> ProtocolResult<JavaType> {
    match tag {
        TypeTag::Boolean => Ok(JavaType::Boolean),
        TypeTag::Byte => Ok(JavaType::Byte),
        TypeTag::Char => Ok(JavaType::Char),
        TypeTag::Short => Ok(JavaType::Short),
        TypeTag::Int => Ok(JavaType::Int),
        TypeTag::Long => Ok(JavaType::Long),
        TypeTag::Float => Ok(JavaType::Float),
        TypeTag::Double => Ok(JavaType::Double),
        TypeTag::Void => Err(ProtocolError::InvalidFieldId),
        _ => Ok(JavaType::Object),
    }
}

/// The JVMTI local getter for a variable of this signature tag
pub fn local_getter(tag: TypeTag) -> ProtocolResult<LocalType> {
    match tag {
        TypeTag::Boolean | TypeTag::Byte | TypeTag::Char | TypeTag::Short | TypeTag::Int => {
            Ok(LocalType::Int)
        }
        TypeTag::Long => Ok(LocalType::Long),
        TypeTag::Float => Ok(LocalType::Float),
        TypeTag::Double => Ok(LocalType::Double),
        TypeTag::Void => Err(ProtocolError::InvalidFieldId),
        _ => Ok(LocalType::Object),
    }
}

/// Signature of an array's component type (`[[I` -> `[I`)
pub fn component_signature(array_signature: &str) -> Result<&str, SignatureError> {
    match array_signature.strip_prefix('[') {
        Some(rest) if !rest.is_empty() => Ok(rest),
        _ => Err(SignatureError::Malformed(array_signature.to_string())),
    }
}

/// `Lcom/example/Foo;` -> `com.example.Foo`; array and primitive signatures
/// are returned as-is
pub fn class_name(signature: &str) -> String {
    match signature.strip_prefix('L').and_then(|s| s.strip_suffix(';')) {
        Some(internal) => internal.replace('/', "."),
        None => signature.to_string(),
    }
}

pub fn parse_field_signature(signature: &str) -> Result<JvmType, SignatureError> {
    let (ty, rest) = parse_type(signature, signature)?;
    if !rest.is_empty() {
        return Err(SignatureError::Malformed(signature.to_string()));
    }
    Ok(ty)
}

pub fn parse_method_signature(signature: &str) -> Result<MethodSignature, SignatureError> {
    let mut rest = signature
        .strip_prefix('(')
        .ok_or_else(|| SignatureError::Malformed(signature.to_string()))?;

    let mut parameters = Vec::new();
    loop {
        if let Some(after) = rest.strip_prefix(')') {
            rest = after;
            break;
        }
        let (ty, after) = parse_type(rest, signature)?;
        if ty == JvmType::Void {
            return Err(SignatureError::Malformed(signature.to_string()));
        }
        parameters.push(ty);
        rest = after;
    }

    let return_type = parse_field_signature(rest)
        .map_err(|_| SignatureError::Malformed(signature.to_string()))?;

    Ok(MethodSignature {
        parameters,
        return_type,
    })
}

fn parse_type<'a>(input: &'a str, whole: &str) -> Result<(JvmType, &'a str), SignatureError> {
    let tag = decode_tag(input).map_err(|e| match e {
        SignatureError::Empty => SignatureError::Malformed(whole.to_string()),
        other => other,
    })?;
    let rest = &input[1..];

    let ty = match tag {
        TypeTag::Boolean => JvmType::Boolean,
        TypeTag::Byte => JvmType::Byte,
        TypeTag::Char => JvmType::Char,
        TypeTag::Short => JvmType::Short,
        TypeTag::Int => JvmType::Int,
        TypeTag::Long => JvmType::Long,
        TypeTag::Float => JvmType::Float,
        TypeTag::Double => JvmType::Double,
        TypeTag::Void => JvmType::Void,
        TypeTag::Object => {
            let end = rest
                .find(';')
                .ok_or_else(|| SignatureError::Malformed(whole.to_string()))?;
            if end == 0 {
                return Err(SignatureError::Malformed(whole.to_string()));
            }
            return Ok((JvmType::Object(rest[..end].to_string()), &rest[end + 1..]));
        }
        TypeTag::Array => {
            let (component, after) = parse_type(rest, whole)?;
            if component == JvmType::Void {
                return Err(SignatureError::Malformed(whole.to_string()));
            }
            return Ok((JvmType::Array(Box::new(component)), after));
        }
        _ => return Err(SignatureError::Malformed(whole.to_string())),
    };

    Ok((ty, rest))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_tag_primitives() {
        let cases = [
            ("Z", TypeTag::Boolean),
            ("B", TypeTag::Byte),
            ("C", TypeTag::Char),
            ("D", TypeTag::Double),
            ("F", TypeTag::Float),
            ("I", TypeTag::Int),
            ("J", TypeTag::Long),
            ("S", TypeTag::Short),
            ("V", TypeTag::Void),
        ];
        for (sig, tag) in cases {
            assert_eq!(decode_tag(sig), Ok(tag), "{}", sig);
        }
    }

    #[test]
    fn test_decode_tag_uses_first_character_only() {
        assert_eq!(decode_tag("Lcom/example/Foo;"), Ok(TypeTag::Object));
        assert_eq!(decode_tag("[[Ljava/lang/String;"), Ok(TypeTag::Array));
        assert_eq!(decode_tag("Igarbage"), Ok(TypeTag::Int));
    }

    #[test]
    fn test_decode_tag_rejects_unknown() {
        assert_eq!(decode_tag(""), Err(SignatureError::Empty));
        assert!(matches!(decode_tag("Q"), Err(SignatureError::UnknownTag('Q', _))));
        assert_eq!(
            ProtocolError::from(decode_tag("x").unwrap_err()),
            ProtocolError::Internal
        );
    }

    #[test]
    fn test_void_is_not_a_value_type() {
        assert_eq!(value_getter(TypeTag::Void), Err(ProtocolError::InvalidFieldId));
        assert_eq!(local_getter(TypeTag::Void), Err(ProtocolError::InvalidFieldId));
        assert_eq!(local_getter(TypeTag::Char), Ok(LocalType::Int));
        assert_eq!(value_getter(TypeTag::Array), Ok(JavaType::Object));
    }

    #[test]
    fn test_parse_field_signature() {
        assert_eq!(
            parse_field_signature("[[Ljava/lang/String;"),
            Ok(JvmType::Array(Box::new(JvmType::Array(Box::new(JvmType::Object(
                "java/lang/String".to_string()
            ))))))
        );
        assert!(parse_field_signature("Ljava/lang/String").is_err());
        assert!(parse_field_signature("II").is_err());
        assert!(parse_field_signature("[V").is_err());
    }

    #[test]
    fn test_parse_method_signature() {
        let sig = parse_method_signature("(I[JLjava/lang/Object;)V").unwrap();
        assert_eq!(
            sig.parameters,
            vec![
                JvmType::Int,
                JvmType::Array(Box::new(JvmType::Long)),
                JvmType::Object("java/lang/Object".to_string()),
            ]
        );
        assert_eq!(sig.return_type, JvmType::Void);

        assert!(parse_method_signature("()").is_err());
        assert!(parse_method_signature("(V)I").is_err());
        assert!(parse_method_signature("I)V").is_err());
    }

    #[test]
    fn test_class_name() {
        assert_eq!(class_name("Lcom/example/Foo;"), "com.example.Foo");
        assert_eq!(class_name("[I"), "[I");
        assert_eq!(component_signature("[[I"), Ok("[I"));
        assert!(component_signature("I").is_err());
    }
}
