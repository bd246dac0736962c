// ObjectReference, StringReference and ArrayReference command implementations
//
// Commands for working with object instances, strings and arrays

use crate::environment::Environment;
use crate::native::{modifiers, JClass, JFieldId, JObject, JavaVm, JniEnv, JvmtiEnv};
use crate::protocol::{ProtocolError, ProtocolResult};
use crate::reference::{ReferenceTracker, ScopedLocalRef};
use crate::service::DebugProtocolService;
use crate::types::{
    ArrayId, FieldId, MethodId, ObjectId, StringId, TaggedReferenceTypeId, ThreadId, Value,
};
use crate::values::{read_array, read_field, FieldOwner};

/// Read one field of `object`. The field may be declared by the object's
/// class or any superclass; static fields are read from their declaring
/// class.
fn read_object_field<V: JavaVm>(
    env: &Environment<'_, V>,
    tracker: &ReferenceTracker,
    object: JObject,
    class: JClass,
    field: JFieldId,
) -> ProtocolResult<Value> {
    let mut current = ScopedLocalRef::new(&env.jni, env.jni.new_local_ref(class));

    while !current.is_null() {
        if let Ok(name) = env.jvmti.get_field_name(current.get(), field) {
            let field_modifiers = env.jvmti.get_field_modifiers(current.get(), field)?;
            let owner = if field_modifiers & modifiers::STATIC != 0 {
                FieldOwner::Static(current.get())
            } else {
                FieldOwner::Instance(object)
            };
            return read_field(env, tracker, owner, field, &name.signature);
        }
        current = ScopedLocalRef::new(&env.jni, env.jni.get_superclass(current.get()));
    }

    Err(ProtocolError::InvalidFieldId)
}

impl<V: JavaVm> DebugProtocolService<V> {
    /// Get the reference type (class) of an object (ObjectReference.ReferenceType command)
    ///
    /// # Arguments
    /// * `object_id` - The ObjectId of the object
    ///
    /// # Returns
    /// The tagged ReferenceTypeId of the object's runtime class
    pub fn get_object_reference_type(
        &self,
        object_id: ObjectId,
    ) -> ProtocolResult<TaggedReferenceTypeId> {
        self.command("ObjectReference.ReferenceType", |env| {
            let object = self.tracker.acquire_object(env, object_id)?;
            let class = ScopedLocalRef::new(&env.jni, env.jni.get_object_class(object.get()))
                .require(ProtocolError::InvalidObject)?;
            self.tracker.track_class(env, class.get())
        })
    }

    /// Get field values from an object (ObjectReference.GetValues command)
    ///
    /// # Arguments
    /// * `object_id` - The ObjectId of the object
    /// * `field_ids` - FieldIds to retrieve, declared by its class or a superclass
    ///
    /// # Returns
    /// Values corresponding to the requested fields, in order
    pub fn get_object_values(
        &self,
        object_id: ObjectId,
        field_ids: &[FieldId],
    ) -> ProtocolResult<Vec<Value>> {
        self.command("ObjectReference.GetValues", |env| {
            let object = self.tracker.acquire_object(env, object_id)?;
            let class = ScopedLocalRef::new(&env.jni, env.jni.get_object_class(object.get()))
                .require(ProtocolError::InvalidObject)?;

            field_ids
                .iter()
                .map(|&field_id| {
                    let field = JFieldId::from_raw(field_id as usize);
                    read_object_field(env, &self.tracker, object.get(), class.get(), field)
                })
                .collect()
        })
    }

    /// Get the string value from a String object (StringReference.Value command)
    ///
    /// # Arguments
    /// * `string_id` - The ObjectId of the String object
    ///
    /// # Returns
    /// The characters of the string, or `InvalidString` if the object is not a string
    pub fn get_string_value(&self, string_id: StringId) -> ProtocolResult<String> {
        self.command("StringReference.Value", |env| {
            let string = self.tracker.acquire_object(env, string_id)?;
            env.jni
                .get_string_utf_chars(string.get())
                .ok_or(ProtocolError::InvalidString)
        })
    }

    /// Get the length of an array (ArrayReference.Length command)
    pub fn get_array_length(&self, array_id: ArrayId) -> ProtocolResult<i32> {
        self.command("ArrayReference.Length", |env| {
            let array = self.tracker.acquire_object(env, array_id)?;
            array_signature(env, array.get())?;
            Ok(env.jni.get_array_length(array.get()))
        })
    }

    /// Get a range of array elements (ArrayReference.GetValues command)
    ///
    /// # Arguments
    /// * `array_id` - The ObjectId of the array
    /// * `first_index` - Index of the first element to read
    /// * `length` - Number of elements to read
    ///
    /// # Returns
    /// The elements, tagged by the array's component type
    pub fn get_array_values(
        &self,
        array_id: ArrayId,
        first_index: i32,
        length: i32,
    ) -> ProtocolResult<Vec<Value>> {
        self.command("ArrayReference.GetValues", |env| {
            let array = self.tracker.acquire_object(env, array_id)?;
            let signature = array_signature(env, array.get())?;

            let array_length = env.jni.get_array_length(array.get());
            if first_index < 0 || first_index > array_length {
                return Err(ProtocolError::InvalidIndex);
            }
            if length < 0 || i64::from(first_index) + i64::from(length) > i64::from(array_length) {
                return Err(ProtocolError::InvalidLength);
            }

            read_array(env, &self.tracker, array.get(), &signature, first_index, length)
        })
    }

    pub fn set_array_values(
        &self,
        _array_id: ArrayId,
        _first_index: i32,
        _values: &[Value],
    ) -> ProtocolResult<()> {
        self.command("ArrayReference.SetValues", |_| Err(ProtocolError::NotImplemented))
    }

    pub fn invoke_method(
        &self,
        _object_id: ObjectId,
        _thread_id: ThreadId,
        _method_id: MethodId,
        _arguments: &[Value],
    ) -> ProtocolResult<Value> {
        self.command("ObjectReference.InvokeMethod", |_| Err(ProtocolError::NotImplemented))
    }
}

// Class signature of an array object; `InvalidArray` for anything else
fn array_signature<V: JavaVm>(env: &Environment<'_, V>, array: JObject) -> ProtocolResult<String> {
    let class = ScopedLocalRef::new(&env.jni, env.jni.get_object_class(array))
        .require(ProtocolError::InvalidObject)?;
    let (signature, _) = env.jvmti.get_class_signature(class.get())?;
    if !signature.starts_with('[') {
        return Err(ProtocolError::InvalidArray);
    }
    Ok(signature)
}
