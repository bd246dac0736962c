// ReferenceType command implementations
//
// Commands for working with classes, interfaces, and arrays

use crate::native::{modifiers, JFieldId, JavaVm, JvmtiEnv};
use crate::protocol::{ProtocolError, ProtocolResult};
use crate::reference::scope_all;
use crate::service::DebugProtocolService;
use crate::types::{
    ClassId, ClassLoaderId, ClassStatus, DeclaredFieldData, DeclaredMethodData, FieldId,
    InterfaceId, ReferenceTypeId, Value,
};
use crate::values::{read_field, FieldOwner};
use tracing::debug;

impl<V: JavaVm> DebugProtocolService<V> {
    /// JNI signature of a reference type (ReferenceType.Signature command)
    pub fn get_signature(&self, ref_type: ReferenceTypeId) -> ProtocolResult<String> {
        self.get_signature_with_generic(ref_type)
            .map(|(signature, _)| signature)
    }

    /// (ReferenceType.SignatureWithGeneric command)
    pub fn get_signature_with_generic(
        &self,
        ref_type: ReferenceTypeId,
    ) -> ProtocolResult<(String, Option<String>)> {
        self.command("ReferenceType.Signature", |env| {
            let class = self.tracker.acquire_class(env, ref_type)?;
            Ok(env.jvmti.get_class_signature(class.get())?)
        })
    }

    /// Access flags of a class (ReferenceType.Modifiers command)
    pub fn get_modifiers(&self, ref_type: ReferenceTypeId) -> ProtocolResult<i32> {
        self.command("ReferenceType.Modifiers", |env| {
            let class = self.tracker.acquire_class(env, ref_type)?;
            Ok(env.jvmti.get_class_modifiers(class.get())?)
        })
    }

    /// Fields declared by a class, inherited ones excluded
    /// (ReferenceType.FieldsWithGeneric command)
    pub fn get_fields(&self, ref_type: ReferenceTypeId) -> ProtocolResult<Vec<DeclaredFieldData>> {
        self.command("ReferenceType.Fields", |env| {
            let class = self.tracker.acquire_class(env, ref_type)?;

            let fields = env.jvmti.get_class_fields(class.get())?;
            let mut result = Vec::with_capacity(fields.len());
            for field in fields {
                let name = env.jvmti.get_field_name(class.get(), field)?;
                let modifiers = env.jvmti.get_field_modifiers(class.get(), field)?;
                result.push(DeclaredFieldData {
                    field_id: field.as_raw() as FieldId,
                    name: name.name,
                    signature: name.signature,
                    generic_signature: name.generic_signature,
                    modifiers,
                });
            }
            Ok(result)
        })
    }

    /// Methods declared by a class (ReferenceType.MethodsWithGeneric command)
    pub fn get_methods(&self, ref_type: ReferenceTypeId) -> ProtocolResult<Vec<DeclaredMethodData>> {
        self.command("ReferenceType.Methods", |env| {
            let class = self.tracker.acquire_class(env, ref_type)?;

            let methods = env.jvmti.get_class_methods(class.get())?;
            let mut result = Vec::with_capacity(methods.len());
            for method in methods {
                let name = env.jvmti.get_method_name(method)?;
                let modifiers = env.jvmti.get_method_modifiers(method)?;
                result.push(DeclaredMethodData {
                    method_id: method.as_raw() as u64,
                    name: name.name,
                    signature: name.signature,
                    generic_signature: name.generic_signature,
                    modifiers,
                });
            }
            debug!("Found {} methods", result.len());
            Ok(result)
        })
    }

    /// Values of static fields (ReferenceType.GetValues command)
    pub fn get_reference_type_values(
        &self,
        ref_type: ReferenceTypeId,
        fields: &[FieldId],
    ) -> ProtocolResult<Vec<Value>> {
        self.command("ReferenceType.GetValues", |env| {
            let class = self.tracker.acquire_class(env, ref_type)?;

            let mut values = Vec::with_capacity(fields.len());
            for &field_id in fields {
                let field = JFieldId::from_raw(field_id as usize);
                let name = env.jvmti.get_field_name(class.get(), field)?;
                let field_modifiers = env.jvmti.get_field_modifiers(class.get(), field)?;
                if field_modifiers & modifiers::STATIC == 0 {
                    return Err(ProtocolError::InvalidFieldId);
                }
                values.push(read_field(
                    env,
                    &self.tracker,
                    FieldOwner::Static(class.get()),
                    field,
                    &name.signature,
                )?);
            }
            Ok(values)
        })
    }

    /// Source file name attribute (ReferenceType.SourceFile command)
    pub fn get_source_file(&self, ref_type: ReferenceTypeId) -> ProtocolResult<String> {
        self.command("ReferenceType.SourceFile", |env| {
            let class = self.tracker.acquire_class(env, ref_type)?;
            Ok(env.jvmti.get_source_file_name(class.get())?)
        })
    }

    pub fn get_reference_type_status(&self, ref_type: ReferenceTypeId) -> ProtocolResult<ClassStatus> {
        self.command("ReferenceType.Status", |env| {
            let class = self.tracker.acquire_class(env, ref_type)?;
            Ok(ClassStatus::from_native(env.jvmti.get_class_status(class.get())?))
        })
    }

    /// Interfaces directly implemented by a class (ReferenceType.Interfaces command)
    pub fn get_interfaces(&self, ref_type: ReferenceTypeId) -> ProtocolResult<Vec<InterfaceId>> {
        self.command("ReferenceType.Interfaces", |env| {
            let class = self.tracker.acquire_class(env, ref_type)?;
            let interfaces = scope_all(&env.jni, env.jvmti.get_implemented_interfaces(class.get())?);
            interfaces
                .iter()
                .map(|interface| {
                    self.tracker
                        .track_class(env, interface.get())
                        .map(|tagged| tagged.type_id)
                })
                .collect()
        })
    }

    pub fn get_superclass(&self, _class: ClassId) -> ProtocolResult<ClassId> {
        self.command("ClassType.Superclass", |_| Err(ProtocolError::NotImplemented))
    }

    pub fn get_class_loader(&self, _ref_type: ReferenceTypeId) -> ProtocolResult<ClassLoaderId> {
        self.command("ReferenceType.ClassLoader", |_| Err(ProtocolError::NotImplemented))
    }
}
