use core::fmt;

#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Error(i32);

impl Error {
    #[inline]
    pub fn code(self) -> i32 {
        self.0
    }

    /// 是否是逻辑缺陷（而非运行时状况）导致的错误
    ///
    /// 这类错误不应被调用者吞掉
    #[inline]
    pub fn is_fatal(self) -> bool {
        self == errno::INVARIANT
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Error({})", errno::error_info(self.0))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(errno::error_info(self.0))
    }
}

impl std::error::Error for Error {}

pub type KResult<T = ()> = core::result::Result<T, Error>;

pub mod errno {
    macro_rules! declare_errno {
        ($($name:tt, $errno:literal, $desc:literal,)*) => {
            $(#[doc = $desc]
            pub const $name: super::Error = super::Error($errno);)*
            pub fn error_info(errno: i32) -> &'static str {
                match errno {
                    $($errno => ::core::concat!(stringify!($name), ", ", $desc),)*
                    _ => unreachable!("{}", errno),
                }
            }
        };
    }

    #[rustfmt::skip]
    declare_errno!(
        INVARIANT,   -1024, "Memory manager invariant violated",
        KILLED,      -1023, "Requesting thread was killed",

        EPERM,          -1,     "Operation not permitted.",
        EIO,            -5,     "I/O error.",
        ENOMEM,         -12,    "Out of memory",
        EFAULT,         -14,    "Bad address.",
        EBUSY,          -16,    "Device or resource busy.",
        EINVAL,         -22,    "Invalid argument.",
    );
}

#[cfg(test)]
mod tests {
    use super::errno;

    #[test]
    fn error_info_names_the_code() {
        assert_eq!(
            errno::ENOMEM.to_string(),
            "ENOMEM, Out of memory"
        );
        assert_eq!(errno::EFAULT.code(), -14);
        assert_eq!(
            format!("{:?}", errno::KILLED),
            "Error(KILLED, Requesting thread was killed)"
        );
    }

    #[test]
    fn only_invariant_is_fatal() {
        assert!(errno::INVARIANT.is_fatal());
        for err in [
            errno::KILLED,
            errno::EPERM,
            errno::EIO,
            errno::ENOMEM,
            errno::EFAULT,
            errno::EBUSY,
            errno::EINVAL,
        ] {
            assert!(!err.is_fatal(), "{err}");
        }
    }
}
