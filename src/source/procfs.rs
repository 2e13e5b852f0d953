use super::{ThreadScope, ThreadSnapshotSource};
use crate::error::{Error, Result};
use crate::model::{
    ResourceSample, ResourceSupport, StackFrame, ThreadDump, ThreadId, ThreadRef, ThreadState,
};
use log::debug;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Class name given to kernel frames read from `/proc/<pid>/task/<tid>/stack`
const KERNEL_CLASS: &str = "kernel";

/// Snapshot source backed by `/proc/<pid>` of a live Linux process.
///
/// Stacks are kernel stacks (readable as root); without access the thread's wait
/// channel is reported as a single frame.
pub struct ProcfsSource {
    pid: u32,
    name: String,
    exe_path: Option<PathBuf>,
    clock_ticks: u64,
}

impl ProcfsSource {
    pub fn new(pid: u32) -> Result<Self> {
        let proc_path = format!("/proc/{}", pid);
        if !Path::new(&proc_path).exists() {
            return Err(Error::ProcessNotFound(format!("PID {}", pid)));
        }

        let name = fs::read_to_string(format!("{}/comm", proc_path))
            .map_err(|_| Error::ProcessNotFound(format!("Cannot read comm for PID {}", pid)))?
            .trim()
            .to_string();

        // Kernel threads have no exe; other processes need ptrace access
        let exe_path = match fs::read_link(format!("{}/exe", proc_path)) {
            Ok(path) => Some(path),
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                return Err(Error::PermissionDenied(format!(
                    "Cannot read exe for PID {}: {}",
                    pid, e
                )));
            }
            Err(_) => None,
        };

        Ok(ProcfsSource {
            pid,
            name,
            exe_path,
            clock_ticks: clock_ticks_per_second(),
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn task_dir(&self, tid: u64) -> PathBuf {
        PathBuf::from(format!("/proc/{}/task/{}", self.pid, tid))
    }

    fn thread_ids(&self) -> Result<Vec<u64>> {
        let task_path = format!("/proc/{}/task", self.pid);
        let entries = fs::read_dir(&task_path).map_err(|e| {
            Error::Transport(format!("Cannot read tasks for PID {}: {}", self.pid, e))
        })?;

        let mut tids: Vec<u64> = entries
            .flatten()
            .filter_map(|entry| entry.file_name().to_str()?.parse().ok())
            .collect();
        tids.sort_unstable();
        Ok(tids)
    }

    /// Dump one thread, `None` if it exited meanwhile
    fn read_dump(&self, tid: u64) -> Option<ThreadDump> {
        let dir = self.task_dir(tid);
        let name = read_trimmed(&dir.join("comm"))?;
        let stat = parse_stat(&fs::read_to_string(dir.join("stat")).ok()?)?;

        let mut dump = ThreadDump::new(ThreadId(tid), name, stat.state());
        dump.suspended = stat.is_stopped();

        if let Ok(status) = fs::read_to_string(dir.join("status")) {
            let (voluntary, involuntary) = parse_ctxt_switches(&status);
            dump.waited_count = voluntary;
            dump.blocked_count = involuntary;
        }
        if let Some(wait_ns) = read_trimmed(&dir.join("schedstat")).and_then(|s| parse_schedstat_wait(&s)) {
            dump.waited_time_ms = Some(wait_ns / 1_000_000);
        }

        let wchan = read_trimmed(&dir.join("wchan")).filter(|w| !w.is_empty() && w != "0");
        if stat.code == 'D' {
            dump.lock_name = wchan.clone();
        }

        let frames = fs::read_to_string(dir.join("stack"))
            .ok()
            .map(|s| parse_kernel_stack(&s))
            .filter(|frames| !frames.is_empty())
            .or_else(|| wchan.map(|w| vec![StackFrame::new(KERNEL_CLASS, w).native()]))
            .unwrap_or_default();
        dump.in_native = !frames.is_empty();
        dump.frames = frames;

        Some(dump)
    }

    fn ensure_alive(&self) -> Result<()> {
        if Path::new(&format!("/proc/{}", self.pid)).exists() {
            Ok(())
        } else {
            Err(Error::Transport(format!(
                "Process {} (PID {}) is no longer running",
                self.name, self.pid
            )))
        }
    }
}

impl ThreadSnapshotSource for ProcfsSource {
    fn threads(&self) -> Result<Vec<ThreadRef>> {
        self.ensure_alive()?;
        Ok(self
            .thread_ids()?
            .into_iter()
            .filter_map(|tid| {
                let name = read_trimmed(&self.task_dir(tid).join("comm"))?;
                Some(ThreadRef {
                    id: ThreadId(tid),
                    name,
                })
            })
            .collect())
    }

    fn snapshot(&self, scope: &ThreadScope) -> Result<Vec<ThreadDump>> {
        self.ensure_alive()?;
        let tids = match scope {
            ThreadScope::All => self.thread_ids()?,
            ThreadScope::Ids(ids) => ids.iter().map(|id| id.0).collect(),
        };

        let dumps: Vec<ThreadDump> = tids.into_iter().filter_map(|tid| self.read_dump(tid)).collect();
        debug!("procfs snapshot of PID {}: {} threads", self.pid, dumps.len());
        Ok(dumps)
    }

    fn resource_support(&self) -> ResourceSupport {
        ResourceSupport {
            cpu_time: true,
            allocated_bytes: false,
        }
    }

    fn resource_usage(&self, ids: &[ThreadId]) -> Result<Vec<ResourceSample>> {
        self.ensure_alive()?;
        Ok(ids
            .iter()
            .filter_map(|&id| {
                let dir = self.task_dir(id.0);
                let name = read_trimmed(&dir.join("comm"))?;
                let stat = parse_stat(&fs::read_to_string(dir.join("stat")).ok()?)?;
                Some(ResourceSample {
                    thread_id: id,
                    thread_name: name,
                    cpu_time_nanos: Some(stat.cpu_ticks() * 1_000_000_000 / self.clock_ticks),
                    allocated_bytes: None,
                })
            })
            .collect())
    }

    fn target_info(&self) -> BTreeMap<String, String> {
        let mut info = BTreeMap::new();
        info.insert("pid".to_string(), self.pid.to_string());
        info.insert("process_name".to_string(), self.name.clone());
        if let Some(exe) = &self.exe_path {
            info.insert("exe_path".to_string(), exe.display().to_string());
        }
        if let Ok(raw) = fs::read(format!("/proc/{}/cmdline", self.pid)) {
            let cmdline = raw
                .split(|&b| b == 0)
                .filter(|arg| !arg.is_empty())
                .map(|arg| String::from_utf8_lossy(arg).into_owned())
                .collect::<Vec<_>>()
                .join(" ");
            if !cmdline.is_empty() {
                info.insert("cmdline".to_string(), cmdline);
            }
        }
        info
    }
}

fn clock_ticks_per_second() -> u64 {
    // SAFETY: sysconf has no preconditions
    let ticks = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
    if ticks > 0 { ticks as u64 } else { 100 }
}

fn read_trimmed(path: &Path) -> Option<String> {
    fs::read_to_string(path).ok().map(|s| s.trim().to_string())
}

/// The fields of `/proc/.../stat` this source uses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StatFields {
    code: char,
    utime: u64,
    stime: u64,
}

impl StatFields {
    fn state(&self) -> ThreadState {
        match self.code {
            'R' => ThreadState::Runnable,
            'S' | 'I' => ThreadState::Waiting,
            'D' => ThreadState::Blocked,
            'T' | 't' => ThreadState::Waiting,
            'Z' | 'X' | 'x' => ThreadState::Terminated,
            other => ThreadState::Other(other.to_string()),
        }
    }

    fn is_stopped(&self) -> bool {
        matches!(self.code, 'T' | 't')
    }

    fn cpu_ticks(&self) -> u64 {
        self.utime + self.stime
    }
}

fn parse_stat(line: &str) -> Option<StatFields> {
    // comm may contain spaces and parentheses; fields resume after the last ')'
    let rest = &line[line.rfind(')')? + 1..];
    let fields: Vec<&str> = rest.split_whitespace().collect();
    Some(StatFields {
        code: fields.first()?.chars().next()?,
        utime: fields.get(11)?.parse().ok()?,
        stime: fields.get(12)?.parse().ok()?,
    })
}

/// (voluntary, nonvoluntary) context switches from `/proc/.../status`
fn parse_ctxt_switches(status: &str) -> (u64, u64) {
    let mut voluntary = 0;
    let mut involuntary = 0;
    for line in status.lines() {
        if let Some((key, value)) = line.split_once(':') {
            let value = value.trim().parse().unwrap_or(0);
            match key {
                "voluntary_ctxt_switches" => voluntary = value,
                "nonvoluntary_ctxt_switches" => involuntary = value,
                _ => {}
            }
        }
    }
    (voluntary, involuntary)
}

/// Run-queue wait time in ns, the second field of `schedstat`
fn parse_schedstat_wait(schedstat: &str) -> Option<u64> {
    schedstat.split_whitespace().nth(1)?.parse().ok()
}

/// Parse `[<0>] do_sys_poll+0x3b0/0x520` lines into frames, outermost first
fn parse_kernel_stack(stack: &str) -> Vec<StackFrame> {
    let mut frames: Vec<StackFrame> = stack
        .lines()
        .filter_map(|line| {
            let symbol = line.split_once("] ").map_or(line, |(_, s)| s).trim();
            let method = symbol.split('+').next()?.trim();
            (!method.is_empty()).then(|| StackFrame::new(KERNEL_CLASS, method).native())
        })
        .collect();
    frames.reverse();
    frames
}

/// Find a process by name (pgrep-style substring matching on `comm`)
pub fn find_process_by_name(pattern: &str) -> Result<u32> {
    let mut matches: Vec<(u32, String)> = Vec::new();

    for entry in fs::read_dir("/proc")? {
        let entry = entry?;
        let Ok(pid) = entry.file_name().to_string_lossy().parse::<u32>() else {
            continue;
        };
        if let Ok(comm) = fs::read_to_string(format!("/proc/{}/comm", pid)) {
            let comm = comm.trim();
            if comm.contains(pattern) && pid != std::process::id() {
                matches.push((pid, comm.to_string()));
            }
        }
    }

    match matches.len() {
        0 => Err(Error::ProcessNotFound(format!("No process matching '{}'", pattern))),
        1 => Ok(matches[0].0),
        _ => {
            let match_list = matches
                .iter()
                .map(|(pid, name)| format!("  PID {}: {}\n", pid, name))
                .collect::<String>();
            Err(Error::MultipleProcesses {
                pattern: pattern.to_string(),
                matches: match_list,
            })
        }
    }
}

/// Sanitize process name for use in filenames
pub fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .take(32)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_stat_with_odd_comm() {
        let line = "4242 (my (odd) app) S 1 4242 4242 0 -1 4194560 120 0 0 0 37 12 0 0 20 0 3 0 1000 0 0";
        let stat = parse_stat(line).unwrap();
        assert_eq!(stat.code, 'S');
        assert_eq!(stat.utime, 37);
        assert_eq!(stat.stime, 12);
        assert_eq!(stat.cpu_ticks(), 49);
        assert_eq!(stat.state(), ThreadState::Waiting);
        assert!(!stat.is_stopped());
    }

    #[test]
    fn test_stat_state_mapping() {
        let stat = |code| StatFields {
            code,
            utime: 0,
            stime: 0,
        };
        assert_eq!(stat('R').state(), ThreadState::Runnable);
        assert_eq!(stat('D').state(), ThreadState::Blocked);
        assert_eq!(stat('Z').state(), ThreadState::Terminated);
        assert!(stat('t').is_stopped());
    }

    #[test]
    fn test_parse_kernel_stack_reverses() {
        let stack = "[<0>] futex_wait_queue+0x60/0x90\n[<0>] futex_wait+0x16e/0x250\n[<0>] do_syscall_64+0x5b/0x110\n";
        let frames = parse_kernel_stack(stack);
        let names: Vec<_> = frames.iter().map(|f| f.method_name.as_str()).collect();
        assert_eq!(names, ["do_syscall_64", "futex_wait", "futex_wait_queue"]);
        assert!(frames.iter().all(|f| f.native && f.class_name == KERNEL_CLASS));
    }

    #[test]
    fn test_parse_status_and_schedstat() {
        let status = "Name:\tworker\nvoluntary_ctxt_switches:\t150\nnonvoluntary_ctxt_switches:\t7\n";
        assert_eq!(parse_ctxt_switches(status), (150, 7));
        assert_eq!(parse_schedstat_wait("123456 7890000 42"), Some(7_890_000));
        assert_eq!(parse_schedstat_wait("garbage"), None);
    }

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("java app/1"), "java-app-1");
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_own_process() {
        let source = ProcfsSource::new(std::process::id()).unwrap();
        let threads = source.threads().unwrap();
        assert!(!threads.is_empty());

        let ids: Vec<ThreadId> = threads.iter().map(|t| t.id).collect();
        let usage = source.resource_usage(&ids).unwrap();
        assert!(usage.iter().all(|s| s.cpu_time_nanos.is_some()));
        assert_eq!(source.target_info()["pid"], std::process::id().to_string());
    }
}
