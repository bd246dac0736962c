// Value marshalling
//
// Field, array element and local variable reads. The signature's first
// character selects the typed getter; the raw result becomes a tagged value.
// Java exceptions raised by JNI getters are cleared and not reported.

use crate::environment::Environment;
use crate::native::{JArray, JClass, JFieldId, JObject, JThread, JValue, JavaVm, JniEnv, JvmtiEnv};
use crate::protocol::{ProtocolError, ProtocolResult};
use crate::reference::{ReferenceTracker, ScopedLocalRef};
use crate::signature::{component_signature, decode_tag, local_getter, value_getter};
use crate::types::{TypeTag, Value, ValueData};
use tracing::debug;

/// Where a field value lives
#[derive(Debug, Clone, Copy)]
pub enum FieldOwner {
    Static(JClass),
    Instance(JObject),
}

// JNI getters may leave a Java exception pending
fn clear_pending_exception<J: JniEnv>(jni: &J) {
    if jni.exception_check() {
        debug!("Cleared exception raised by a JNI read");
        jni.exception_clear();
    }
}

pub fn read_field<V: JavaVm>(
    env: &Environment<'_, V>,
    tracker: &ReferenceTracker,
    owner: FieldOwner,
    field: JFieldId,
    signature: &str,
) -> ProtocolResult<Value> {
    let tag = decode_tag(signature)?;
    let getter = value_getter(tag)?;

    let raw = match owner {
        FieldOwner::Static(class) => env.jni.get_static_field(class, field, getter),
        FieldOwner::Instance(object) => env.jni.get_field(object, field, getter),
    };
    clear_pending_exception(&env.jni);

    wrap(env, tracker, tag, raw)
}

/// Read `length` elements starting at `first`. Bounds are the caller's to
/// check.
pub fn read_array<V: JavaVm>(
    env: &Environment<'_, V>,
    tracker: &ReferenceTracker,
    array: JArray,
    array_signature: &str,
    first: i32,
    length: i32,
) -> ProtocolResult<Vec<Value>> {
    let tag = decode_tag(component_signature(array_signature)?)?;

    if tag.is_object() {
        let mut values = Vec::with_capacity(length.max(0) as usize);
        for index in first..first + length {
            let element = env.jni.get_object_array_element(array, index);
            clear_pending_exception(&env.jni);
            values.push(wrap(env, tracker, tag, JValue::Object(element))?);
        }
        return Ok(values);
    }

    let getter = value_getter(tag)?;
    let region = env.jni.get_array_region(array, getter, first, length);
    clear_pending_exception(&env.jni);
    if region.len() != length.max(0) as usize {
        return Err(ProtocolError::Internal);
    }

    region
        .into_iter()
        .map(|raw| primitive(tag, raw).map(|data| Value { tag, data }))
        .collect()
}

pub fn read_local<V: JavaVm>(
    env: &Environment<'_, V>,
    tracker: &ReferenceTracker,
    thread: JThread,
    depth: i32,
    slot: i32,
    signature: &str,
) -> ProtocolResult<Value> {
    let tag = decode_tag(signature)?;
    let getter = local_getter(tag)?;
    let raw = env.jvmti.get_local(thread, depth, slot, getter)?;
    wrap(env, tracker, tag, raw)
}

/// Tag a raw value. Object results are local references owned here; they
/// are tracked and then released.
pub fn wrap<V: JavaVm>(
    env: &Environment<'_, V>,
    tracker: &ReferenceTracker,
    tag: TypeTag,
    raw: JValue,
) -> ProtocolResult<Value> {
    match raw {
        JValue::Object(local) => {
            let local = ScopedLocalRef::new(&env.jni, local);
            let tagged = tracker.track_object(env, local.get(), tag)?;
            Ok(Value::object(tagged))
        }
        raw => Ok(Value {
            tag,
            data: primitive(tag, raw)?,
        }),
    }
}

// Local getters return sub-int primitives widened to int
fn primitive(tag: TypeTag, raw: JValue) -> ProtocolResult<ValueData> {
    let data = match (tag, raw) {
        (TypeTag::Boolean, JValue::Boolean(v)) => ValueData::Boolean(v),
        (TypeTag::Boolean, JValue::Int(v)) => ValueData::Boolean(v != 0),
        (TypeTag::Byte, JValue::Byte(v)) => ValueData::Byte(v),
        (TypeTag::Byte, JValue::Int(v)) => ValueData::Byte(v as i8),
        (TypeTag::Char, JValue::Char(v)) => ValueData::Char(v),
        (TypeTag::Char, JValue::Int(v)) => ValueData::Char(v as u16),
        (TypeTag::Short, JValue::Short(v)) => ValueData::Short(v),
        (TypeTag::Short, JValue::Int(v)) => ValueData::Short(v as i16),
        (TypeTag::Int, JValue::Int(v)) => ValueData::Int(v),
        (TypeTag::Long, JValue::Long(v)) => ValueData::Long(v),
        (TypeTag::Float, JValue::Float(v)) => ValueData::Float(v),
        (TypeTag::Double, JValue::Double(v)) => ValueData::Double(v),
        _ => return Err(ProtocolError::TypeMismatch),
    };
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sub_int_locals_are_narrowed() {
        assert_eq!(primitive(TypeTag::Boolean, JValue::Int(1)), Ok(ValueData::Boolean(true)));
        assert_eq!(primitive(TypeTag::Byte, JValue::Int(-1)), Ok(ValueData::Byte(-1)));
        assert_eq!(primitive(TypeTag::Char, JValue::Int(65)), Ok(ValueData::Char(65)));
        assert_eq!(primitive(TypeTag::Short, JValue::Int(300)), Ok(ValueData::Short(300)));
    }

    #[test]
    fn test_mismatched_raw_value() {
        assert_eq!(
            primitive(TypeTag::Long, JValue::Int(1)),
            Err(ProtocolError::TypeMismatch)
        );
    }
}
