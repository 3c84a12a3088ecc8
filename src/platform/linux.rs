// Copyright (c) 2021, Qualcomm Innovation Center, Inc. All rights reserved.
//
// SPDX-License-Identifier: BSD-3-Clause
use signal_hook::consts::signal::*;
use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;

pub fn signal_to_string(code: i32) -> &'static str {
    match code {
        SIGABRT => stringify!(SIGABRT),
        SIGALRM => stringify!(SIGALRM),
        SIGBUS => stringify!(SIGBUS),
        SIGCHLD => stringify!(SIGCHLD),
        SIGCONT => stringify!(SIGCONT),
        SIGFPE => stringify!(SIGFPE),
        SIGHUP => stringify!(SIGHUP),
        SIGILL => stringify!(SIGILL),
        SIGINT => stringify!(SIGINT),
        SIGIO => stringify!(SIGIO),
        SIGKILL => stringify!(SIGKILL),
        SIGPIPE => stringify!(SIGPIPE),
        SIGPROF => stringify!(SIGPROF),
        SIGQUIT => stringify!(SIGQUIT),
        SIGSEGV => stringify!(SIGSEGV),
        SIGSTOP => stringify!(SIGSTOP),
        SIGSYS => stringify!(SIGSYS),
        SIGTERM => stringify!(SIGTERM),
        SIGTRAP => stringify!(SIGTRAP),
        SIGTSTP => stringify!(SIGTSTP),
        SIGTTIN => stringify!(SIGTTIN),
        SIGTTOU => stringify!(SIGTTOU),
        SIGURG => stringify!(SIGURG),
        SIGUSR1 => stringify!(SIGUSR1),
        SIGUSR2 => stringify!(SIGUSR2),
        SIGVTALRM => stringify!(SIGVTALRM),
        SIGWINCH => stringify!(SIGWINCH),
        SIGXCPU => stringify!(SIGXCPU),
        SIGXFSZ => stringify!(SIGXFSZ),
        _ => "UNKNOWN",
    }
}

/// Describe how a child finished, e.g. `exit code 1` or `signal SIGSEGV (11)`
pub fn exit_status_to_string(status: &ExitStatus) -> String {
    if let Some(signal) = status.signal() {
        format!("signal {} ({})", signal_to_string(signal), signal)
    } else if let Some(code) = status.code() {
        format!("exit code {}", code)
    } else {
        "unknown status".to_string()
    }
}
