// Windows implementations of the topology and process-affinity seams.

use log::debug;
use windows::Win32::Foundation::{
    CloseHandle, ERROR_ACCESS_DENIED, ERROR_INSUFFICIENT_BUFFER, ERROR_INVALID_PARAMETER, HANDLE,
};
use windows::Win32::System::Diagnostics::ToolHelp::{
    CreateToolhelp32Snapshot, Process32FirstW, Process32NextW, PROCESSENTRY32W, TH32CS_SNAPPROCESS,
};
use windows::Win32::System::SystemInformation::{
    GetLogicalProcessorInformationEx, LOGICAL_PROCESSOR_RELATIONSHIP, RelationGroup,
    RelationProcessorCore, SYSTEM_LOGICAL_PROCESSOR_INFORMATION_EX,
};
use windows::Win32::System::Threading::{
    OpenProcess, SetPriorityClass, SetProcessAffinityMask, PROCESS_MODE_BACKGROUND_END,
    PROCESS_SET_INFORMATION,
};

use super::controller::{ApplyError, ProcessAffinitySink, ProcessEntry};
use super::mask::AffinityMask;
use super::topology::{CoreTopology, TopologyProvider};
use super::AffinityError;

/// Performance cores report a higher efficiency class than efficiency cores.
const PERFORMANCE_EFFICIENCY_CLASS: u8 = 1;

/// Topology detection via `GetLogicalProcessorInformationEx`.
pub struct WindowsTopologyProvider;

impl TopologyProvider for WindowsTopologyProvider {
    fn detect(&self) -> Result<CoreTopology, AffinityError> {
        let mut total_logical = 0u32;
        for info in enumerate_processor_info(RelationGroup)? {
            // Single-group machines: the last group carries the logical count.
            let group = unsafe { info.Anonymous.Group };
            if group.ActiveGroupCount > 0 {
                total_logical = group.GroupInfo[0].MaximumProcessorCount as u32;
            }
        }

        let mut efficiency = 0u32;
        let mut performance = 0u32;
        for info in enumerate_processor_info(RelationProcessorCore)? {
            let core = unsafe { info.Anonymous.Processor };
            for _ in 0..core.GroupCount {
                if core.EfficiencyClass == PERFORMANCE_EFFICIENCY_CLASS {
                    performance += 1;
                } else {
                    efficiency += 1;
                }
            }
        }

        if total_logical == 0 {
            return Err(AffinityError::TopologyUnavailable(
                "processor group enumeration returned no groups".into(),
            ));
        }
        if efficiency > total_logical {
            return Err(AffinityError::TopologyUnavailable(format!(
                "inconsistent core report: {} efficiency cores, {} logical processors",
                efficiency, total_logical
            )));
        }

        debug!(
            "[AFFINITY] Detected {} logical, {} efficiency, {} performance cores",
            total_logical, efficiency, performance
        );
        Ok(CoreTopology::new(total_logical, efficiency, performance))
    }
}

/// Query the processor-information table for one relationship kind and
/// return the variably-sized records it contains.
fn enumerate_processor_info(
    relationship: LOGICAL_PROCESSOR_RELATIONSHIP,
) -> Result<Vec<SYSTEM_LOGICAL_PROCESSOR_INFORMATION_EX>, AffinityError> {
    let mut length = 0u32;

    // First call sizes the buffer.
    let probe = unsafe { GetLogicalProcessorInformationEx(relationship, None, &mut length) };
    match probe {
        Ok(()) => return Ok(Vec::new()),
        Err(e) if e.code() == ERROR_INSUFFICIENT_BUFFER.to_hresult() => {}
        Err(e) => return Err(AffinityError::TopologyUnavailable(e.to_string())),
    }

    // u64 backing keeps the records properly aligned.
    let mut buffer = vec![0u64; (length as usize).div_ceil(8)];
    unsafe {
        GetLogicalProcessorInformationEx(
            relationship,
            Some(buffer.as_mut_ptr() as *mut SYSTEM_LOGICAL_PROCESSOR_INFORMATION_EX),
            &mut length,
        )
    }
    .map_err(|e| AffinityError::TopologyUnavailable(e.to_string()))?;

    // Records are variably sized; walk them by their Size field.
    let mut records = Vec::new();
    let base = buffer.as_ptr() as *const u8;
    let mut offset = 0usize;
    while offset < length as usize {
        let info = unsafe {
            std::ptr::read_unaligned(base.add(offset) as *const SYSTEM_LOGICAL_PROCESSOR_INFORMATION_EX)
        };
        if info.Size == 0 {
            break;
        }
        records.push(info);
        offset += info.Size as usize;
    }
    Ok(records)
}

/// Live-process enumeration and affinity application via the toolhelp
/// snapshot API and `SetProcessAffinityMask`.
pub struct WindowsProcessSink;

impl ProcessAffinitySink for WindowsProcessSink {
    fn snapshot(&self) -> Result<Vec<ProcessEntry>, AffinityError> {
        unsafe {
            let snapshot = CreateToolhelp32Snapshot(TH32CS_SNAPPROCESS, 0)
                .map_err(|e| AffinityError::SnapshotFailed(e.to_string()))?;

            let mut entry = PROCESSENTRY32W {
                dwSize: std::mem::size_of::<PROCESSENTRY32W>() as u32,
                ..Default::default()
            };

            let mut processes = Vec::new();
            if Process32FirstW(snapshot, &mut entry).is_ok() {
                loop {
                    processes.push(ProcessEntry {
                        pid: entry.th32ProcessID,
                        name: exe_file_name(&entry.szExeFile),
                    });
                    if Process32NextW(snapshot, &mut entry).is_err() {
                        break;
                    }
                }
            }

            let _ = CloseHandle(snapshot);
            Ok(processes)
        }
    }

    fn set_affinity(&self, process: &ProcessEntry, mask: AffinityMask) -> Result<(), ApplyError> {
        unsafe {
            let handle = OpenProcess(PROCESS_SET_INFORMATION, false, process.pid)
                .map_err(classify_os_error)?;

            let result = SetProcessAffinityMask(handle, mask.bits() as usize)
                .map_err(classify_os_error);

            // Leave background scheduling mode if an earlier move enabled it.
            let _ = SetPriorityClass(handle, PROCESS_MODE_BACKGROUND_END);

            close_handle(handle);
            result
        }
    }
}

fn exe_file_name(raw: &[u16]) -> String {
    let len = raw.iter().position(|&c| c == 0).unwrap_or(raw.len());
    String::from_utf16_lossy(&raw[..len])
}

fn classify_os_error(e: windows::core::Error) -> ApplyError {
    if e.code() == ERROR_ACCESS_DENIED.to_hresult() {
        ApplyError::AccessDenied
    } else if e.code() == ERROR_INVALID_PARAMETER.to_hresult() {
        // OpenProcess reports a stale pid as an invalid parameter.
        ApplyError::ProcessExited
    } else {
        ApplyError::Os(e.to_string())
    }
}

fn close_handle(handle: HANDLE) {
    unsafe {
        let _ = CloseHandle(handle);
    }
}
