//! Thin wrappers over `epoll` and `eventfd`.
use std::{
    io,
    os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd},
    time::Duration,
};

use libc::{EFD_CLOEXEC, EFD_NONBLOCK, EPOLLIN, EPOLL_CLOEXEC, EPOLL_CTL_ADD, EPOLL_CTL_DEL};

pub use events::Events;

mod events;

fn cvt(ret: libc::c_int) -> io::Result<libc::c_int> {
    if ret == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret)
    }
}

/// An epoll instance watching file descriptors for readability.
pub struct Poll {
    epoll: OwnedFd,
}

impl Poll {
    pub fn new() -> io::Result<Self> {
        let fd = cvt(unsafe { libc::epoll_create1(EPOLL_CLOEXEC) })?;

        Ok(Self {
            epoll: unsafe { OwnedFd::from_raw_fd(fd) },
        })
    }

    /// Watch `fd`; readiness is reported as `token`.
    pub fn add(&self, fd: BorrowedFd<'_>, token: u64) -> io::Result<()> {
        let mut event = libc::epoll_event {
            events: EPOLLIN as u32,
            u64: token,
        };

        cvt(unsafe {
            libc::epoll_ctl(
                self.epoll.as_raw_fd(),
                EPOLL_CTL_ADD,
                fd.as_raw_fd(),
                &mut event,
            )
        })?;

        Ok(())
    }

    pub fn delete(&self, fd: BorrowedFd<'_>) -> io::Result<()> {
        cvt(unsafe {
            libc::epoll_ctl(
                self.epoll.as_raw_fd(),
                EPOLL_CTL_DEL,
                fd.as_raw_fd(),
                std::ptr::null_mut(),
            )
        })?;

        Ok(())
    }

    pub fn wait<'a>(
        &self,
        events: &'a mut Events,
        timeout: Option<Duration>,
    ) -> io::Result<impl Iterator<Item = u64> + 'a> {
        events.wait(self.epoll.as_raw_fd(), timeout)
    }
}

/// A counter file descriptor used to wake a thread blocked in [Poll::wait].
pub struct EventFd {
    fd: OwnedFd,
}

impl EventFd {
    pub fn new() -> io::Result<Self> {
        let fd = cvt(unsafe { libc::eventfd(0, EFD_NONBLOCK | EFD_CLOEXEC) })?;

        Ok(Self {
            fd: unsafe { OwnedFd::from_raw_fd(fd) },
        })
    }

    /// Make the descriptor readable.
    pub fn notify(&self) -> io::Result<()> {
        let one: u64 = 1;
        let ret = unsafe {
            libc::write(
                self.fd.as_raw_fd(),
                &one as *const u64 as *const _,
                std::mem::size_of::<u64>(),
            )
        };

        match ret {
            -1 => match io::Error::last_os_error() {
                // The counter is saturated, so it is readable anyway.
                e if e.kind() == io::ErrorKind::WouldBlock => Ok(()),
                e => Err(e),
            },
            _ => Ok(()),
        }
    }

    /// Reset the counter so the descriptor is no longer readable.
    pub fn drain(&self) {
        let mut buf: u64 = 0;
        unsafe {
            libc::read(
                self.fd.as_raw_fd(),
                &mut buf as *mut u64 as *mut _,
                std::mem::size_of::<u64>(),
            )
        };
    }
}

impl AsFd for EventFd {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        os::fd::{AsFd, AsRawFd, FromRawFd, OwnedFd},
        thread,
        time::{Duration, Instant},
    };

    use anyhow::Result;
    use libc::{AF_LOCAL, SOCK_NONBLOCK, SOCK_STREAM};

    use super::{EventFd, Events, Poll};

    fn write(fd: impl AsFd, buf: &[u8]) {
        let ret = unsafe {
            libc::write(
                fd.as_fd().as_raw_fd(),
                buf.as_ptr() as *const _,
                buf.len() as _,
            )
        };

        if ret == -1 {
            panic!("write failed");
        }
    }

    #[test]
    fn eventfd_wakes_poll() -> Result<()> {
        let poll = Poll::new()?;
        let evt = EventFd::new()?;
        let mut events = Events::with_capacity(8);
        poll.add(evt.as_fd(), 7)?;

        evt.notify()?;
        let tokens: Vec<_> = poll.wait(&mut events, None)?.collect();
        assert_eq!(tokens, vec![7]);

        evt.drain();
        let tokens: Vec<_> = poll
            .wait(&mut events, Some(Duration::from_millis(20)))?
            .collect();
        assert!(tokens.is_empty());

        Ok(())
    }

    #[test]
    fn socket_readiness_from_other_thread() -> Result<()> {
        let mut fds = [0, 0];
        let ret =
            unsafe { libc::socketpair(AF_LOCAL, SOCK_STREAM | SOCK_NONBLOCK, 0, fds.as_mut_ptr()) };
        assert_ne!(ret, -1, "socketpair failed");

        let a = unsafe { OwnedFd::from_raw_fd(fds[0]) };
        let b = unsafe { OwnedFd::from_raw_fd(fds[1]) };

        let poll = Poll::new()?;
        let mut events = Events::with_capacity(4);
        poll.add(a.as_fd(), 10)?;

        let start = Instant::now();
        let t1 = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            write(b, &[2]);
        });

        let tokens: Vec<_> = poll.wait(&mut events, None)?.collect();
        assert_eq!(tokens, vec![10]);
        assert!(start.elapsed() >= Duration::from_millis(50));

        poll.delete(a.as_fd())?;
        t1.join().unwrap();

        Ok(())
    }
}
