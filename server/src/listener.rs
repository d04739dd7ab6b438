//! Listening socket setup.

use std::net::Ipv4Addr;
use std::os::fd::RawFd;

use crate::error::ServerError;

/// Create a TCP listening socket bound to `host:port` with SO_REUSEADDR and
/// a SOMAXCONN backlog. Returns the fd and the bound port (useful when
/// `port` is 0).
pub fn create_listener(host: &str, port: u16) -> Result<(RawFd, u16), ServerError> {
    let addr: Ipv4Addr = host
        .parse()
        .map_err(|_| ServerError::Setup(format!("invalid IPv4 address: {host}")))?;

    let fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_STREAM, 0) };
    if fd < 0 {
        return Err(ServerError::Io(std::io::Error::last_os_error()));
    }

    let optval: libc::c_int = 1;
    unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_REUSEADDR,
            &optval as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        );
    }

    let mut sa: libc::sockaddr_in = unsafe { std::mem::zeroed() };
    sa.sin_family = libc::AF_INET as libc::sa_family_t;
    sa.sin_port = port.to_be();
    sa.sin_addr.s_addr = u32::from_ne_bytes(addr.octets());

    let ret = unsafe {
        libc::bind(
            fd,
            &sa as *const _ as *const libc::sockaddr,
            std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
        )
    };
    if ret < 0 {
        let err = std::io::Error::last_os_error();
        unsafe {
            libc::close(fd);
        }
        return Err(ServerError::Io(err));
    }

    let ret = unsafe { libc::listen(fd, libc::SOMAXCONN) };
    if ret < 0 {
        let err = std::io::Error::last_os_error();
        unsafe {
            libc::close(fd);
        }
        return Err(ServerError::Io(err));
    }

    // Recover the bound port for ephemeral binds.
    let mut bound: libc::sockaddr_in = unsafe { std::mem::zeroed() };
    let mut len = std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t;
    let ret = unsafe {
        libc::getsockname(fd, &mut bound as *mut _ as *mut libc::sockaddr, &mut len)
    };
    if ret < 0 {
        let err = std::io::Error::last_os_error();
        unsafe {
            libc::close(fd);
        }
        return Err(ServerError::Io(err));
    }

    Ok((fd, u16::from_be(bound.sin_port)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ephemeral_bind_reports_port() {
        let (fd, port) = create_listener("127.0.0.1", 0).unwrap();
        assert!(port > 0);
        unsafe {
            libc::close(fd);
        }
    }

    #[test]
    fn invalid_host_rejected() {
        assert!(create_listener("not-an-address", 0).is_err());
    }
}
