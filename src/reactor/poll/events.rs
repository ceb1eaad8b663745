use std::{io, os::fd::RawFd, time::Duration};

/// Buffer for the readiness events returned by one `epoll_wait`.
pub struct Events {
    inner: Vec<libc::epoll_event>,
}

impl Events {
    pub fn with_capacity(n: usize) -> Self {
        Self {
            inner: vec![libc::epoll_event { events: 0, u64: 0 }; n.max(1)],
        }
    }

    /// Wait on the epoll instance `epfd` and yield the tokens that became
    /// ready. An interrupted wait yields nothing rather than failing.
    pub fn wait(
        &mut self,
        epfd: RawFd,
        timeout: Option<Duration>,
    ) -> io::Result<impl Iterator<Item = u64> + '_> {
        let timeout = timeout.map_or(-1, |t| t.as_millis().min(i32::MAX as u128) as i32);

        let n = unsafe {
            libc::epoll_wait(
                epfd,
                self.inner.as_mut_ptr(),
                self.inner.len() as i32,
                timeout,
            )
        };

        let n = if n == -1 {
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
            0
        } else {
            n as usize
        };

        Ok(self.inner.iter().take(n).map(|x| x.u64))
    }
}
