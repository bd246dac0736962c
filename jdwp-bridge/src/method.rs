// Method command implementations
//
// Commands for working with methods (line tables, variable tables, bytecodes)

use crate::native::{modifiers, JMethodId, JavaVm, JvmtiEnv};
use crate::protocol::{ProtocolError, ProtocolResult};
use crate::service::DebugProtocolService;
use crate::signature::{parse_method_signature, JvmType};
use crate::types::{LineEntry, LineTable, MethodId, ReferenceTypeId, Variable, VariableTable};
use bytes::Bytes;

/// Method ids are the native `jmethodID` values; 0 is never valid
pub(crate) fn native_method(method_id: MethodId) -> ProtocolResult<JMethodId> {
    if method_id == 0 {
        return Err(ProtocolError::InvalidMethodId);
    }
    Ok(JMethodId::from_raw(method_id as usize))
}

// Long and double arguments take two slots
fn slot_size(ty: &JvmType) -> i32 {
    match ty {
        JvmType::Long | JvmType::Double => 2,
        _ => 1,
    }
}

impl<V: JavaVm> DebugProtocolService<V> {
    /// Get line table for a method (Method.LineTable command)
    /// Maps source code line numbers to bytecode positions
    pub fn get_method_line_table(
        &self,
        ref_type: ReferenceTypeId,
        method_id: MethodId,
    ) -> ProtocolResult<LineTable> {
        self.command("Method.LineTable", |env| {
            self.tracker.acquire_class(env, ref_type)?;
            let method = native_method(method_id)?;

            let (start, end) = env.jvmti.get_method_location(method)?;
            let lines = env
                .jvmti
                .get_line_number_table(method)?
                .into_iter()
                .map(|entry| LineEntry {
                    line_code_index: entry.start_location.max(0) as u64,
                    line_number: entry.line_number,
                })
                .collect();

            Ok(LineTable {
                start: start.max(0) as u64,
                end: end.max(0) as u64,
                lines,
            })
        })
    }

    /// Get variable table for a method (Method.VariableTableWithGeneric command)
    pub fn get_method_variable_table(
        &self,
        ref_type: ReferenceTypeId,
        method_id: MethodId,
    ) -> ProtocolResult<VariableTable> {
        self.command("Method.VariableTable", |env| {
            self.tracker.acquire_class(env, ref_type)?;
            let method = native_method(method_id)?;

            let entries = env.jvmti.get_local_variable_table(method)?;

            let name = env.jvmti.get_method_name(method)?;
            let signature = parse_method_signature(&name.signature)?;
            let mut arg_count: i32 = signature.parameters.iter().map(slot_size).sum();
            if env.jvmti.get_method_modifiers(method)? & modifiers::STATIC == 0 {
                arg_count += 1;
            }

            let variables = entries
                .into_iter()
                .map(|entry| Variable {
                    code_index: entry.start_location.max(0) as u64,
                    name: entry.name,
                    signature: entry.signature,
                    generic_signature: entry.generic_signature,
                    length: entry.length.max(0) as u32,
                    slot: entry.slot.max(0) as u32,
                })
                .collect();

            Ok(VariableTable {
                arg_count,
                variables,
            })
        })
    }

    /// Raw bytecodes of a method (Method.Bytecodes command)
    pub fn get_method_bytecodes(
        &self,
        ref_type: ReferenceTypeId,
        method_id: MethodId,
    ) -> ProtocolResult<Bytes> {
        self.command("Method.Bytecodes", |env| {
            self.tracker.acquire_class(env, ref_type)?;
            let method = native_method(method_id)?;
            Ok(Bytes::from(env.jvmti.get_bytecodes(method)?))
        })
    }
}
