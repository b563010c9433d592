//! Signal-based backend for Linux.
//!
//! Synchronous fault signals are translated into [`ExceptionCode`]s:
//!
//! | Signal    | `si_code`                | Code                      |
//! |-----------|--------------------------|---------------------------|
//! | `SIGSEGV` | near the stack pointer   | `STACK_OVERFLOW`          |
//! | `SIGSEGV` | otherwise                | `ACCESS_VIOLATION`        |
//! | `SIGBUS`  | `BUS_ADRALN`             | `DATATYPE_MISALIGNMENT`   |
//! | `SIGBUS`  | otherwise                | `IN_PAGE_ERROR`           |
//! | `SIGILL`  | `ILL_PRVOPC`/`ILL_PRVREG`| `PRIV_INSTRUCTION`        |
//! | `SIGILL`  | otherwise                | `ILLEGAL_INSTRUCTION`     |
//! | `SIGFPE`  | per `FPE_*`              | integer and float codes   |
//! | `SIGTRAP` | `TRAP_TRACE`             | `SINGLE_STEP`             |
//! | `SIGTRAP` | otherwise                | `BREAKPOINT`              |
//!
//! The signal handler itself only reads the registers and both clocks. It
//! hands that to a dedicated handler thread with a large stack, blocks until
//! the thread has classified, reported and notified, and then exits or
//! chains. The faulting thread may be running on a small alternate stack
//! (Rust threads get one of a few KiB from std), so nothing heavier than a
//! pipe write happens on it. A fault on the handler thread, or a second
//! fault on a thread that is already waiting for it, prints
//! [`MINIMAL_NOTICE`] and exits.

use core::{
    ffi::{CStr, c_int, c_void},
    mem, ptr, slice,
    sync::atomic::{AtomicPtr, AtomicU64, Ordering},
};
use std::{
    io::{self, PipeReader, PipeWriter, Read, Write},
    panic::{AssertUnwindSafe, catch_unwind},
    thread::{self, JoinHandle},
    time::{Instant, SystemTime},
};

use libc::siginfo_t;
use rootcause::{Report, prelude::ResultExt};

use crate::{
    capture::{LoadedModule, MAX_MODULES, ProcessView},
    code::ExceptionCode,
    fault::FaultEvent,
    handler::FATAL_EXIT_CODE,
    hooks::{InitializeError, with_active_handler},
    notify::MINIMAL_NOTICE,
    registers::{PointerWidth, RegisterSet},
};

const SIGNALS: [(c_int, &str); 5] = [
    (libc::SIGSEGV, "SIGSEGV"),
    (libc::SIGBUS, "SIGBUS"),
    (libc::SIGILL, "SIGILL"),
    (libc::SIGFPE, "SIGFPE"),
    (libc::SIGTRAP, "SIGTRAP"),
];

/// Size of the alternate signal stack given to the initializing thread.
const ALT_STACK_SIZE: usize = 64 * 1024;

/// Stack of the handler thread, which runs capture, symbolization,
/// formatting and file I/O.
const HANDLER_STACK_SIZE: usize = 8 * 1024 * 1024;

const REPLY_CONTINUE: u8 = 0;
const REPLY_EXIT: u8 = 1;

/// A `SIGSEGV` this close to the stack pointer is a stack overflow.
const STACK_GUARD_DISTANCE: u64 = 64 * 1024;

// Kernel si_code values (asm-generic/siginfo.h).
const FPE_INTDIV: c_int = 1;
const FPE_INTOVF: c_int = 2;
const FPE_FLTDIV: c_int = 3;
const FPE_FLTOVF: c_int = 4;
const FPE_FLTUND: c_int = 5;
const FPE_FLTRES: c_int = 6;
const FPE_FLTINV: c_int = 7;
const FPE_FLTSUB: c_int = 8;
const ILL_PRVOPC: c_int = 5;
const ILL_PRVREG: c_int = 6;
const BUS_ADRALN: c_int = 1;
const TRAP_TRACE: c_int = 2;

#[cfg(target_pointer_width = "64")]
type ProgramHeader = libc::Elf64_Phdr;
#[cfg(target_pointer_width = "32")]
type ProgramHeader = libc::Elf32_Phdr;

static PREVIOUS: spin::RwLock<Option<[libc::sigaction; 5]>> = spin::RwLock::new(None);
static ALT_STACK: AtomicPtr<u8> = AtomicPtr::new(ptr::null_mut());

static HANDOFF: spin::Mutex<Option<Handoff>> = spin::Mutex::new(None);
static PENDING: spin::Mutex<Option<RawFault>> = spin::Mutex::new(None);
/// Thread id of the faulting thread currently waiting on the handler thread.
static HANDOFF_OWNER: AtomicU64 = AtomicU64::new(0);
static HANDLER_THREAD: AtomicU64 = AtomicU64::new(0);

/// A delivery as read inside the signal handler.
#[derive(Copy, Clone, Debug)]
struct RawFault {
    code: ExceptionCode,
    address: u64,
    registers: Option<RegisterSet>,
    thread_id: u64,
    wall: SystemTime,
    monotonic: Instant,
}

impl RawFault {
    fn into_event(self) -> FaultEvent {
        let event = FaultEvent::at(self.code, self.address, self.thread_id, self.wall, self.monotonic);
        match self.registers {
            Some(registers) => event.with_registers(registers),
            None => event,
        }
    }
}

/// The signal handler's end of the channel to the handler thread.
struct Handoff {
    requests: PipeWriter,
    replies: PipeReader,
    worker: JoinHandle<()>,
}

impl Handoff {
    fn exchange(&mut self, fault: RawFault) -> Option<i32> {
        *PENDING.lock() = Some(fault);
        self.requests.write_all(&[1]).ok()?;
        let mut reply = [0u8; 5];
        self.replies.read_exact(&mut reply).ok()?;
        decode_reply(reply)
    }
}

fn encode_reply(exit_code: Option<i32>) -> [u8; 5] {
    let mut reply = [REPLY_CONTINUE; 5];
    if let Some(exit_code) = exit_code {
        reply[0] = REPLY_EXIT;
        reply[1..].copy_from_slice(&exit_code.to_ne_bytes());
    }
    reply
}

fn decode_reply(reply: [u8; 5]) -> Option<i32> {
    let [tag, code @ ..] = reply;
    (tag == REPLY_EXIT).then(|| i32::from_ne_bytes(code))
}

/// Maps a fault signal onto the exception code namespace.
pub(crate) fn translate(
    signal: c_int,
    si_code: c_int,
    fault_address: u64,
    stack_pointer: Option<u64>,
) -> ExceptionCode {
    match signal {
        libc::SIGSEGV => match stack_pointer {
            Some(sp) if fault_address.abs_diff(sp) <= STACK_GUARD_DISTANCE => ExceptionCode::STACK_OVERFLOW,
            _ => ExceptionCode::ACCESS_VIOLATION,
        },
        libc::SIGBUS if si_code == BUS_ADRALN => ExceptionCode::DATATYPE_MISALIGNMENT,
        libc::SIGBUS => ExceptionCode::IN_PAGE_ERROR,
        libc::SIGILL if si_code == ILL_PRVOPC || si_code == ILL_PRVREG => ExceptionCode::PRIV_INSTRUCTION,
        libc::SIGILL => ExceptionCode::ILLEGAL_INSTRUCTION,
        libc::SIGFPE => match si_code {
            FPE_INTDIV => ExceptionCode::INT_DIVIDE_BY_ZERO,
            FPE_INTOVF => ExceptionCode::INT_OVERFLOW,
            FPE_FLTDIV => ExceptionCode::FLT_DIVIDE_BY_ZERO,
            FPE_FLTOVF => ExceptionCode::FLT_OVERFLOW,
            FPE_FLTUND => ExceptionCode::FLT_UNDERFLOW,
            FPE_FLTRES => ExceptionCode::FLT_INEXACT_RESULT,
            FPE_FLTSUB => ExceptionCode::ARRAY_BOUNDS_EXCEEDED,
            FPE_FLTINV => ExceptionCode::FLT_INVALID_OPERATION,
            _ => ExceptionCode::FLT_INVALID_OPERATION,
        },
        libc::SIGTRAP if si_code == TRAP_TRACE => ExceptionCode::SINGLE_STEP,
        libc::SIGTRAP => ExceptionCode::BREAKPOINT,
        _ => ExceptionCode(0),
    }
}

fn blank_action() -> libc::sigaction {
    // SAFETY: all-zero is SIG_DFL with an empty mask and no flags.
    unsafe { mem::zeroed() }
}

/// Installs the signal handlers, the alternate stack and the handler thread.
pub(crate) fn install() -> Result<(), Report<InitializeError>> {
    install_alternate_stack()?;
    start_handler_thread()?;

    let mut previous = [blank_action(); 5];
    for (&(signal, name), slot) in SIGNALS.iter().zip(previous.iter_mut()) {
        // SAFETY: queries the current action into a live value.
        if unsafe { libc::sigaction(signal, ptr::null(), slot) } != 0 {
            stop_handler_thread();
            return Err(io::Error::last_os_error())
                .context(InitializeError::InstallSignalHandler { signal: name });
        }
    }
    *PREVIOUS.write() = Some(previous);

    let mut action = blank_action();
    action.sa_sigaction = on_signal as extern "C" fn(c_int, *mut siginfo_t, *mut c_void) as libc::sighandler_t;
    action.sa_flags = libc::SA_SIGINFO | libc::SA_ONSTACK | libc::SA_NODEFER;
    // SAFETY: initializes the mask of a live value.
    unsafe { libc::sigemptyset(&mut action.sa_mask) };

    for (index, &(signal, name)) in SIGNALS.iter().enumerate() {
        // SAFETY: `on_signal` has the signature SA_SIGINFO requires.
        if unsafe { libc::sigaction(signal, &action, ptr::null_mut()) } != 0 {
            let error = io::Error::last_os_error();
            restore(&previous[..index]);
            *PREVIOUS.write() = None;
            stop_handler_thread();
            return Err(error).context(InitializeError::InstallSignalHandler { signal: name });
        }
    }
    Ok(())
}

/// Restores the recorded signal actions.
pub(crate) fn uninstall() {
    let previous = PREVIOUS.write().take();
    if let Some(previous) = previous {
        restore(&previous);
    }
    stop_handler_thread();
    remove_alternate_stack();
}

fn restore(previous: &[libc::sigaction]) {
    for (&(signal, _), action) in SIGNALS.iter().zip(previous) {
        // SAFETY: the action was reported by the kernel for this signal.
        unsafe { libc::sigaction(signal, action, ptr::null_mut()) };
    }
}

fn start_handler_thread() -> Result<(), Report<InitializeError>> {
    let (request_reader, requests) = io::pipe().context(InitializeError::HandlerThread)?;
    let (replies, reply_writer) = io::pipe().context(InitializeError::HandlerThread)?;
    let worker = thread::Builder::new()
        .name("faultward-handler".to_owned())
        .stack_size(HANDLER_STACK_SIZE)
        .spawn(move || serve(request_reader, reply_writer))
        .context(InitializeError::HandlerThread)
        .attach(format!("stack size: {HANDLER_STACK_SIZE} bytes"))?;

    *HANDOFF.lock() = Some(Handoff {
        requests,
        replies,
        worker,
    });
    Ok(())
}

fn stop_handler_thread() {
    let handoff = HANDOFF.lock().take();
    if let Some(Handoff {
        requests,
        replies,
        worker,
    }) = handoff
    {
        // End of input stops the thread.
        drop(requests);
        if worker.join().is_err() {
            tracing::warn!("crash handler thread panicked");
        }
        drop(replies);
    }
}

/// Body of the handler thread: one request byte per fault, one reply each.
fn serve(mut requests: PipeReader, mut replies: PipeWriter) {
    HANDLER_THREAD.store(current_thread_id(), Ordering::Release);
    tracing::debug!("crash handler thread started");

    let mut wake = [0u8; 1];
    while requests.read_exact(&mut wake).is_ok() {
        let fault = PENDING.lock().take();
        let exit_code = fault.and_then(|fault| {
            catch_unwind(AssertUnwindSafe(|| {
                let event = fault.into_event();
                with_active_handler(|handler| handler.handle(&event, &LiveProcess))?.exit_code()
            }))
            .unwrap_or_else(|_| {
                let _ = writeln!(io::stderr(), "{MINIMAL_NOTICE}");
                Some(FATAL_EXIT_CODE)
            })
        });
        if replies.write_all(&encode_reply(exit_code)).is_err() {
            break;
        }
    }

    HANDLER_THREAD.store(0, Ordering::Release);
}

fn install_alternate_stack() -> Result<(), Report<InitializeError>> {
    let mut current = libc::stack_t {
        ss_sp: ptr::null_mut(),
        ss_flags: 0,
        ss_size: 0,
    };
    // SAFETY: only queries the current stack.
    let queried = unsafe { libc::sigaltstack(ptr::null(), &mut current) } == 0;
    if queried && current.ss_flags & libc::SS_DISABLE == 0 && current.ss_size >= ALT_STACK_SIZE {
        return Ok(());
    }

    let mut base = ALT_STACK.load(Ordering::Acquire);
    if base.is_null() {
        base = Box::leak(vec![0u8; ALT_STACK_SIZE].into_boxed_slice()).as_mut_ptr();
        ALT_STACK.store(base, Ordering::Release);
    }

    let stack = libc::stack_t {
        ss_sp: base.cast(),
        ss_flags: 0,
        ss_size: ALT_STACK_SIZE,
    };
    // SAFETY: the region is leaked and stays valid for the rest of the process.
    if unsafe { libc::sigaltstack(&stack, ptr::null_mut()) } != 0 {
        return Err(io::Error::last_os_error())
            .context(InitializeError::AlternateStack)
            .attach(format!("stack size: {ALT_STACK_SIZE} bytes"));
    }
    Ok(())
}

fn remove_alternate_stack() {
    let ours = ALT_STACK.load(Ordering::Acquire);
    let mut current = libc::stack_t {
        ss_sp: ptr::null_mut(),
        ss_flags: 0,
        ss_size: 0,
    };
    // SAFETY: only queries the current stack.
    let queried = unsafe { libc::sigaltstack(ptr::null(), &mut current) } == 0;
    if !queried || ours.is_null() || current.ss_sp.cast::<u8>() != ours {
        return;
    }
    let disabled = libc::stack_t {
        ss_sp: ptr::null_mut(),
        ss_flags: libc::SS_DISABLE,
        ss_size: 0,
    };
    // SAFETY: disabling takes no memory from us.
    unsafe { libc::sigaltstack(&disabled, ptr::null_mut()) };
}

fn current_thread_id() -> u64 {
    // SAFETY: gettid has no preconditions.
    let tid = unsafe { libc::syscall(libc::SYS_gettid) };
    tid as u64
}

extern "C" fn on_signal(signal: c_int, info: *mut siginfo_t, context: *mut c_void) {
    let thread_id = current_thread_id();
    if thread_id == HANDLER_THREAD.load(Ordering::Acquire) || thread_id == HANDOFF_OWNER.load(Ordering::Acquire) {
        terminate_minimal();
    }

    let read = catch_unwind(AssertUnwindSafe(|| {
        // SAFETY: both pointers are the arguments of this delivery.
        unsafe { read_delivery(signal, info, context, thread_id) }
    }));
    let Ok((fault, si_code)) = read else {
        terminate_minimal();
    };

    if let Some(exit_code) = dispatch(fault) {
        // SAFETY: _exit is async-signal-safe and skips all destructors.
        unsafe { libc::_exit(exit_code) };
    }

    chain(signal, info, context, si_code);
}

/// # Safety
///
/// `info` and `context` must be null or the arguments of the current
/// delivery.
unsafe fn read_delivery(
    signal: c_int,
    info: *mut siginfo_t,
    context: *mut c_void,
    thread_id: u64,
) -> (RawFault, c_int) {
    // SAFETY: for SA_SIGINFO handlers `info` is null or valid for the delivery.
    let delivered = unsafe { info.as_ref() };
    let (si_code, fault_address) = match delivered {
        Some(info) => {
            // SAFETY: si_addr is part of every fault siginfo.
            let address = unsafe { info.si_addr() };
            (info.si_code, address.addr() as u64)
        }
        None => (0, 0),
    };

    // SAFETY: `context` is the ucontext passed with this delivery.
    let registers = unsafe { registers_from(context) };
    let code = translate(
        signal,
        si_code,
        fault_address,
        registers.map(|registers| registers.stack_pointer()),
    );
    let fault = RawFault {
        code,
        address: fault_address,
        registers,
        thread_id,
        wall: SystemTime::now(),
        monotonic: Instant::now(),
    };
    (fault, si_code)
}

/// Hands `fault` to the handler thread and waits for its decision.
///
/// Returns the exit status to terminate with, or `None` when the delivery
/// should be passed on.
fn dispatch(fault: RawFault) -> Option<i32> {
    let mut slot = HANDOFF.lock();
    HANDOFF_OWNER.store(fault.thread_id, Ordering::Release);
    let exit_code = slot.as_mut().and_then(|handoff| handoff.exchange(fault));
    HANDOFF_OWNER.store(0, Ordering::Release);
    exit_code
}

fn terminate_minimal() -> ! {
    write_stderr(MINIMAL_NOTICE.as_bytes());
    write_stderr(b"\n");
    // SAFETY: _exit is async-signal-safe and skips all destructors.
    unsafe { libc::_exit(FATAL_EXIT_CODE) }
}

fn write_stderr(bytes: &[u8]) {
    // SAFETY: write(2) is async-signal-safe and reads only `bytes`.
    unsafe { libc::write(libc::STDERR_FILENO, bytes.as_ptr().cast(), bytes.len()) };
}

/// Passes a delivery on to whatever was installed before us.
fn chain(signal: c_int, info: *mut siginfo_t, context: *mut c_void, si_code: c_int) {
    let previous = PREVIOUS.try_read().and_then(|guard| {
        let actions = (*guard)?;
        let index = SIGNALS.iter().position(|&(s, _)| s == signal)?;
        Some(actions[index])
    });

    match previous {
        Some(action) if action.sa_sigaction != libc::SIG_DFL && action.sa_sigaction != libc::SIG_IGN => {
            if action.sa_flags & libc::SA_SIGINFO != 0 {
                // SAFETY: registered with SA_SIGINFO, so this is its signature.
                let handler = unsafe {
                    mem::transmute::<libc::sighandler_t, extern "C" fn(c_int, *mut siginfo_t, *mut c_void)>(
                        action.sa_sigaction,
                    )
                };
                handler(signal, info, context);
            } else {
                // SAFETY: registered without SA_SIGINFO, so this is its signature.
                let handler = unsafe { mem::transmute::<libc::sighandler_t, extern "C" fn(c_int)>(action.sa_sigaction) };
                handler(signal);
            }
        }
        // A sent signal that was ignored before stays ignored.
        Some(action) if action.sa_sigaction == libc::SIG_IGN && si_code <= 0 => {}
        _ => {
            let default = blank_action();
            // SAFETY: installs SIG_DFL.
            unsafe { libc::sigaction(signal, &default, ptr::null_mut()) };
            // Kernel faults re-execute and hit the default action on return.
            if si_code <= 0 {
                // SAFETY: raise has no preconditions.
                unsafe { libc::raise(signal) };
            }
        }
    }
}

/// # Safety
///
/// `context` must be null or point to the `ucontext_t` of the current
/// delivery.
#[cfg(target_arch = "x86_64")]
unsafe fn registers_from(context: *mut c_void) -> Option<RegisterSet> {
    use crate::registers::Arch64Registers;

    // SAFETY: guaranteed by the caller.
    let context = unsafe { context.cast::<libc::ucontext_t>().as_ref() }?;
    let gregs = &context.uc_mcontext.gregs;
    let reg = |index: c_int| gregs[index as usize] as u64;

    Some(RegisterSet::Arch64(Arch64Registers {
        rax: reg(libc::REG_RAX),
        rbx: reg(libc::REG_RBX),
        rcx: reg(libc::REG_RCX),
        rdx: reg(libc::REG_RDX),
        rsi: reg(libc::REG_RSI),
        rdi: reg(libc::REG_RDI),
        rbp: reg(libc::REG_RBP),
        rsp: reg(libc::REG_RSP),
        r8: reg(libc::REG_R8),
        r9: reg(libc::REG_R9),
        r10: reg(libc::REG_R10),
        r11: reg(libc::REG_R11),
        r12: reg(libc::REG_R12),
        r13: reg(libc::REG_R13),
        r14: reg(libc::REG_R14),
        r15: reg(libc::REG_R15),
        rip: reg(libc::REG_RIP),
        rflags: reg(libc::REG_EFL),
    }))
}

/// # Safety
///
/// `context` must be null or point to the `ucontext_t` of the current
/// delivery.
#[cfg(target_arch = "x86")]
unsafe fn registers_from(context: *mut c_void) -> Option<RegisterSet> {
    use crate::registers::Arch32Registers;

    // SAFETY: guaranteed by the caller.
    let context = unsafe { context.cast::<libc::ucontext_t>().as_ref() }?;
    let gregs = &context.uc_mcontext.gregs;
    let reg = |index: c_int| gregs[index as usize] as u32;

    Some(RegisterSet::Arch32(Arch32Registers {
        eax: reg(libc::REG_EAX),
        ebx: reg(libc::REG_EBX),
        ecx: reg(libc::REG_ECX),
        edx: reg(libc::REG_EDX),
        esi: reg(libc::REG_ESI),
        edi: reg(libc::REG_EDI),
        ebp: reg(libc::REG_EBP),
        esp: reg(libc::REG_ESP),
        eip: reg(libc::REG_EIP),
        eflags: reg(libc::REG_EFL),
    }))
}

/// # Safety
///
/// Always safe; other architectures carry no supported register layout.
#[cfg(not(any(target_arch = "x86_64", target_arch = "x86")))]
unsafe fn registers_from(_context: *mut c_void) -> Option<RegisterSet> {
    None
}

/// The running process, read through fault-free paths.
///
/// Memory is read with `process_vm_readv` (or, where that is unavailable,
/// by writing through a pipe), both of which report bad addresses as
/// errors instead of faulting.
#[derive(Copy, Clone, Debug, Default)]
pub struct LiveProcess;

impl LiveProcess {
    fn read(address: u64, buf: &mut [u8]) -> bool {
        let Ok(remote_address) = usize::try_from(address) else {
            return false;
        };
        let local = libc::iovec {
            iov_base: buf.as_mut_ptr().cast(),
            iov_len: buf.len(),
        };
        let remote = libc::iovec {
            iov_base: ptr::with_exposed_provenance_mut(remote_address),
            iov_len: buf.len(),
        };
        // SAFETY: the kernel validates the remote range; the local one is `buf`.
        let read = unsafe { libc::process_vm_readv(libc::getpid(), &local, 1, &remote, 1, 0) };
        if read >= 0 {
            return read as usize == buf.len();
        }
        if io::Error::last_os_error().raw_os_error() == Some(libc::EFAULT) {
            return false;
        }
        Self::read_through_pipe(remote_address, buf)
    }

    fn read_through_pipe(address: usize, buf: &mut [u8]) -> bool {
        let mut fds: [c_int; 2] = [-1; 2];
        // SAFETY: `fds` has room for both descriptors.
        if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
            return false;
        }
        let source = ptr::with_exposed_provenance::<c_void>(address);
        // SAFETY: write(2) fails with EFAULT on unreadable memory instead of faulting.
        let written = unsafe { libc::write(fds[1], source, buf.len()) };
        let ok = written >= 0 && written as usize == buf.len() && {
            // SAFETY: reads into `buf`, which is large enough.
            let read = unsafe { libc::read(fds[0], buf.as_mut_ptr().cast(), buf.len()) };
            read >= 0 && read as usize == buf.len()
        };
        for fd in fds {
            // SAFETY: both descriptors were opened above.
            unsafe { libc::close(fd) };
        }
        ok
    }

    fn executable_path() -> Option<String> {
        std::fs::read_link("/proc/self/exe")
            .ok()
            .map(|path| path.to_string_lossy().into_owned())
    }
}

struct ModuleCollector {
    modules: Vec<LoadedModule>,
    limit: usize,
    executable: Option<String>,
}

unsafe extern "C" fn collect_module(info: *mut libc::dl_phdr_info, _size: libc::size_t, data: *mut c_void) -> c_int {
    // SAFETY: `data` is the collector passed to dl_iterate_phdr.
    let collector = unsafe { &mut *data.cast::<ModuleCollector>() };
    // SAFETY: the loader passes a valid entry for the duration of the callback.
    let Some(info) = (unsafe { info.as_ref() }) else {
        return 0;
    };
    if collector.modules.len() >= collector.limit {
        return 1;
    }

    let headers: &[ProgramHeader] = if info.dlpi_phdr.is_null() {
        &[]
    } else {
        // SAFETY: dlpi_phdr points to dlpi_phnum headers.
        unsafe { slice::from_raw_parts(info.dlpi_phdr, usize::from(info.dlpi_phnum)) }
    };
    let (start, end) = headers
        .iter()
        .filter(|header| header.p_type == libc::PT_LOAD)
        .fold((u64::MAX, 0u64), |(start, end), header| {
            let vaddr = u64::from(header.p_vaddr);
            (start.min(vaddr), end.max(vaddr.saturating_add(u64::from(header.p_memsz))))
        });
    if start >= end {
        return 0;
    }

    let name = if info.dlpi_name.is_null() {
        String::new()
    } else {
        // SAFETY: dlpi_name is a nul-terminated string owned by the loader.
        unsafe { CStr::from_ptr(info.dlpi_name) }.to_string_lossy().into_owned()
    };
    let path = if name.is_empty() {
        collector.executable.clone().unwrap_or_else(|| "[main]".to_owned())
    } else {
        name
    };

    collector.modules.push(LoadedModule::new(
        path,
        u64::from(info.dlpi_addr).wrapping_add(start),
        end - start,
    ));
    0
}

impl ProcessView for LiveProcess {
    fn read_pointer(&self, address: u64, width: PointerWidth) -> Option<u64> {
        match width {
            PointerWidth::Bits32 => {
                let mut buf = [0u8; 4];
                Self::read(address, &mut buf).then(|| u64::from(u32::from_ne_bytes(buf)))
            }
            PointerWidth::Bits64 => {
                let mut buf = [0u8; 8];
                Self::read(address, &mut buf).then(|| u64::from_ne_bytes(buf))
            }
        }
    }

    fn loaded_modules(&self, limit: usize) -> Vec<LoadedModule> {
        let mut collector = ModuleCollector {
            modules: Vec::new(),
            limit: limit.min(MAX_MODULES),
            executable: Self::executable_path(),
        };
        // SAFETY: the callback only uses `collector`, and only during this call.
        unsafe { libc::dl_iterate_phdr(Some(collect_module), (&raw mut collector).cast()) };
        collector.modules
    }

    fn module_at(&self, address: u64) -> Option<String> {
        let mut info = libc::Dl_info {
            dli_fname: ptr::null(),
            dli_fbase: ptr::null_mut(),
            dli_sname: ptr::null(),
            dli_saddr: ptr::null_mut(),
        };
        let target = ptr::with_exposed_provenance::<c_void>(usize::try_from(address).ok()?);
        // SAFETY: dladdr only inspects loader tables and writes to `info`.
        if unsafe { libc::dladdr(target, &mut info) } == 0 || info.dli_fname.is_null() {
            return None;
        }
        // SAFETY: dli_fname is a nul-terminated string owned by the loader.
        let name = unsafe { CStr::from_ptr(info.dli_fname) }.to_string_lossy().into_owned();
        if name.is_empty() {
            Self::executable_path()
        } else {
            Some(name)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::ModuleMap;

    #[test]
    fn translates_fault_signals() {
        let cases = [
            (libc::SIGSEGV, 1, 0x10, Some(0x7fff_0000), ExceptionCode::ACCESS_VIOLATION),
            (libc::SIGSEGV, 2, 0x7ffe_fff8, Some(0x7fff_0000), ExceptionCode::STACK_OVERFLOW),
            (libc::SIGSEGV, 1, 0x10, None, ExceptionCode::ACCESS_VIOLATION),
            (libc::SIGBUS, BUS_ADRALN, 0x11, None, ExceptionCode::DATATYPE_MISALIGNMENT),
            (libc::SIGBUS, 2, 0x11, None, ExceptionCode::IN_PAGE_ERROR),
            (libc::SIGILL, ILL_PRVOPC, 0, None, ExceptionCode::PRIV_INSTRUCTION),
            (libc::SIGILL, 1, 0, None, ExceptionCode::ILLEGAL_INSTRUCTION),
            (libc::SIGFPE, FPE_INTDIV, 0, None, ExceptionCode::INT_DIVIDE_BY_ZERO),
            (libc::SIGFPE, FPE_FLTUND, 0, None, ExceptionCode::FLT_UNDERFLOW),
            (libc::SIGFPE, FPE_FLTSUB, 0, None, ExceptionCode::ARRAY_BOUNDS_EXCEEDED),
            (libc::SIGFPE, 0, 0, None, ExceptionCode::FLT_INVALID_OPERATION),
            (libc::SIGTRAP, TRAP_TRACE, 0, None, ExceptionCode::SINGLE_STEP),
            (libc::SIGTRAP, 1, 0, None, ExceptionCode::BREAKPOINT),
        ];
        for (signal, si_code, address, sp, expected) in cases {
            assert_eq!(translate(signal, si_code, address, sp), expected, "{signal} {si_code}");
        }
    }

    #[test]
    fn replies_carry_the_exit_status() {
        assert_eq!(decode_reply(encode_reply(None)), None);
        assert_eq!(decode_reply(encode_reply(Some(FATAL_EXIT_CODE))), Some(FATAL_EXIT_CODE));
        assert_eq!(decode_reply([REPLY_CONTINUE, 1, 0, 0, 0]), None);
    }

    #[test]
    fn raw_faults_keep_their_clocks() {
        let wall = SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(86_400);
        let monotonic = Instant::now();
        let registers = RegisterSet::Arch64(crate::registers::Arch64Registers {
            rip: 0x40_1000,
            ..Default::default()
        });
        let event = RawFault {
            code: ExceptionCode::ACCESS_VIOLATION,
            address: 0x10,
            registers: Some(registers),
            thread_id: 9,
            wall,
            monotonic,
        }
        .into_event();

        assert_eq!(event.timestamp.timestamp(), 86_400);
        assert_eq!(event.monotonic, monotonic);
        assert_eq!(event.instruction_pointer(), Some(0x40_1000));
        assert_eq!(event.thread_id, 9);
    }

    #[test]
    fn handler_thread_answers_and_stops() {
        start_handler_thread().unwrap();
        assert!(HANDOFF.lock().is_some());

        // Nothing is registered in this binary, so every delivery is passed on.
        let fault = RawFault {
            code: ExceptionCode::ACCESS_VIOLATION,
            address: 0,
            registers: None,
            thread_id: current_thread_id(),
            wall: SystemTime::now(),
            monotonic: Instant::now(),
        };
        assert_eq!(dispatch(fault), None);
        assert_eq!(HANDOFF_OWNER.load(Ordering::Acquire), 0);
        assert!(PENDING.lock().is_none());

        stop_handler_thread();
        assert!(HANDOFF.lock().is_none());
        assert_eq!(HANDLER_THREAD.load(Ordering::Acquire), 0);
        assert_eq!(dispatch(fault), None);
    }

    #[test]
    fn reads_own_memory() {
        let value: u64 = 0x0123_4567_89AB_CDEF;
        let address = (&raw const value).addr() as u64;
        assert_eq!(LiveProcess.read_pointer(address, PointerWidth::Bits64), Some(value));
        #[cfg(target_endian = "little")]
        assert_eq!(LiveProcess.read_pointer(address, PointerWidth::Bits32), Some(0x89AB_CDEF));
    }

    #[test]
    fn unmapped_memory_reads_none() {
        assert_eq!(LiveProcess.read_pointer(0, PointerWidth::Bits64), None);
        assert_eq!(LiveProcess.read_pointer(8, PointerWidth::Bits32), None);
    }

    #[test]
    fn modules_cover_own_code() {
        let address = translates_fault_signals as usize as u64;
        let modules = LiveProcess.loaded_modules(MAX_MODULES);
        assert!(!modules.is_empty());
        assert!(ModuleMap::new(modules).module_for(address).is_some());
        assert!(LiveProcess.module_at(address).is_some());
        assert!(LiveProcess.loaded_modules(1).len() <= 1);
    }
}
