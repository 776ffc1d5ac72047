// ============================================
// catalogsetup - registry.rs
// ============================================
// Registry access behind a small trait so the configuration logic can be
// tested without Windows.
//
// The real implementation talks to HKEY_LOCAL_MACHINE through the Win32
// registry API (64-bit view). Every call returns a status code:
//
//   ERROR_SUCCESS         -> done / present
//   ERROR_FILE_NOT_FOUND  -> absent (Ok(false))
//   anything else         -> RegistryError
//
// Only "not found" counts as absent. A denied or locked key is an error, so
// a delete that didn't happen is never reported as "nothing to delete".
// ============================================

use std::fmt;
use std::io;

use thiserror::Error;

// Win32 status codes (winerror.h)
const ERROR_SUCCESS: u32 = 0;
const ERROR_FILE_NOT_FOUND: u32 = 2;
const ERROR_ACCESS_DENIED: u32 = 5;

// Value types (winnt.h)
const REG_SZ: u32 = 1;
const REG_DWORD: u32 = 4;
const REG_MULTI_SZ: u32 = 7;

// ============================================
// VALUES AND ERRORS
// ============================================

/// A registry value we know how to write
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegValue {
    /// REG_SZ
    Sz(String),
    /// REG_MULTI_SZ
    MultiSz(Vec<String>),
    /// REG_DWORD
    Dword(u32),
}

impl RegValue {
    /// Type name as regedit spells it
    pub fn kind(&self) -> &'static str {
        match self {
            RegValue::Sz(_) => "REG_SZ",
            RegValue::MultiSz(_) => "REG_MULTI_SZ",
            RegValue::Dword(_) => "REG_DWORD",
        }
    }

    /// Numeric value type passed to RegSetValueExW
    pub fn type_code(&self) -> u32 {
        match self {
            RegValue::Sz(_) => REG_SZ,
            RegValue::MultiSz(_) => REG_MULTI_SZ,
            RegValue::Dword(_) => REG_DWORD,
        }
    }

    /// Raw value data: UTF-16LE strings with NUL terminators, the list
    /// closed by an extra NUL, DWORDs little-endian.
    pub fn encode(&self) -> Vec<u8> {
        let units: Vec<u16> = match self {
            RegValue::Sz(s) => to_wide(s),
            RegValue::MultiSz(items) => {
                let mut units: Vec<u16> = items.iter().flat_map(|item| to_wide(item)).collect();
                if items.is_empty() {
                    units.push(0);
                }
                units.push(0);
                units
            }
            RegValue::Dword(n) => return n.to_le_bytes().to_vec(),
        };
        units.iter().flat_map(|u| u.to_le_bytes()).collect()
    }
}

impl fmt::Display for RegValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegValue::Sz(s) => write!(f, "{}", s),
            RegValue::MultiSz(items) => write!(f, "[{}]", items.join(", ")),
            RegValue::Dword(n) => write!(f, "{}", n),
        }
    }
}

/// NUL-terminated UTF-16
fn to_wide(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(std::iter::once(0)).collect()
}

fn os_message(code: &u32) -> String {
    io::Error::from_raw_os_error(*code as i32).to_string()
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("registry key not found: {0}")]
    KeyNotFound(String),

    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("{action} failed for {key} (error {code}): {}", os_message(.code))]
    Os {
        action: &'static str,
        key: String,
        code: u32,
    },

    #[error("the registry is only available on Windows")]
    Unsupported,
}

/// Turn a registry call's status into present (true) / absent (false) / error.
#[cfg_attr(not(windows), allow(dead_code))]
fn check_status(status: u32, action: &'static str, key: &str) -> Result<bool, RegistryError> {
    match status {
        ERROR_SUCCESS => Ok(true),
        ERROR_FILE_NOT_FOUND => Ok(false),
        ERROR_ACCESS_DENIED => Err(RegistryError::AccessDenied(key.to_string())),
        code => Err(RegistryError::Os {
            action,
            key: key.to_string(),
            code,
        }),
    }
}

/// Key/value store the configuration is written to.
///
/// Key paths are relative to HKEY_LOCAL_MACHINE and use `\` separators.
pub trait RegistryStore {
    /// Does the key exist? Errors other than "not found" are returned.
    fn key_exists(&self, key: &str) -> Result<bool, RegistryError>;

    /// Create or overwrite a value on an existing key
    fn set_value(&self, key: &str, name: &str, value: &RegValue) -> Result<(), RegistryError>;

    /// Remove a value. Ok(false) when it wasn't there.
    fn delete_value(&self, key: &str, name: &str) -> Result<bool, RegistryError>;

    /// Remove a subkey and everything under it. Ok(false) when it wasn't there.
    fn delete_subkey(&self, key: &str, subkey: &str) -> Result<bool, RegistryError>;
}

// ============================================
// WIN32 IMPLEMENTATION
// ============================================

/// Registry store on HKEY_LOCAL_MACHINE.
#[derive(Debug, Default, Clone, Copy)]
pub struct HklmRegistry;

impl HklmRegistry {
    pub fn new() -> Self {
        HklmRegistry
    }
}

#[cfg(windows)]
mod native {
    use super::{check_status, to_wide, HklmRegistry, RegValue, RegistryError, RegistryStore};
    use std::ptr;
    use winapi::shared::minwindef::HKEY;
    use winapi::um::winnt::{
        DELETE, KEY_ENUMERATE_SUB_KEYS, KEY_QUERY_VALUE, KEY_READ, KEY_SET_VALUE, KEY_WOW64_64KEY,
    };
    use winapi::um::winreg::{
        RegCloseKey, RegDeleteTreeW, RegDeleteValueW, RegOpenKeyExW, RegSetValueExW,
        HKEY_LOCAL_MACHINE,
    };

    /// Open key handle, closed on drop
    struct OpenKey(HKEY);

    impl OpenKey {
        /// Ok(None) when the key doesn't exist
        fn open(key: &str, access: u32) -> Result<Option<OpenKey>, RegistryError> {
            let path = to_wide(key.trim_matches('\\'));
            let mut handle: HKEY = ptr::null_mut();
            let status = unsafe {
                RegOpenKeyExW(
                    HKEY_LOCAL_MACHINE,
                    path.as_ptr(),
                    0,
                    access | KEY_WOW64_64KEY,
                    &mut handle,
                )
            };
            if check_status(status as u32, "open", key)? {
                Ok(Some(OpenKey(handle)))
            } else {
                Ok(None)
            }
        }

        /// Like `open`, but a missing key is an error
        fn open_existing(key: &str, access: u32) -> Result<OpenKey, RegistryError> {
            OpenKey::open(key, access)?.ok_or_else(|| RegistryError::KeyNotFound(key.to_string()))
        }
    }

    impl Drop for OpenKey {
        fn drop(&mut self) {
            unsafe {
                RegCloseKey(self.0);
            }
        }
    }

    impl RegistryStore for HklmRegistry {
        fn key_exists(&self, key: &str) -> Result<bool, RegistryError> {
            Ok(OpenKey::open(key, KEY_READ)?.is_some())
        }

        fn set_value(&self, key: &str, name: &str, value: &RegValue) -> Result<(), RegistryError> {
            let handle = OpenKey::open_existing(key, KEY_SET_VALUE)?;
            let name_w = to_wide(name);
            let data = value.encode();

            let status = unsafe {
                RegSetValueExW(
                    handle.0,
                    name_w.as_ptr(),
                    0,
                    value.type_code(),
                    data.as_ptr(),
                    data.len() as u32,
                )
            };
            let target = format!(r"{}\{}", key, name);
            if !check_status(status as u32, "set value", &target)? {
                return Err(RegistryError::KeyNotFound(key.to_string()));
            }
            tracing::debug!(key, name, kind = value.kind(), "registry value written");
            Ok(())
        }

        fn delete_value(&self, key: &str, name: &str) -> Result<bool, RegistryError> {
            let handle = OpenKey::open_existing(key, KEY_SET_VALUE)?;
            let name_w = to_wide(name);

            let status = unsafe { RegDeleteValueW(handle.0, name_w.as_ptr()) };
            check_status(status as u32, "delete value", &format!(r"{}\{}", key, name))
        }

        fn delete_subkey(&self, key: &str, subkey: &str) -> Result<bool, RegistryError> {
            let access = DELETE | KEY_ENUMERATE_SUB_KEYS | KEY_QUERY_VALUE | KEY_SET_VALUE;
            let handle = OpenKey::open_existing(key, access)?;
            let subkey_w = to_wide(subkey);

            let status = unsafe { RegDeleteTreeW(handle.0, subkey_w.as_ptr()) };
            check_status(status as u32, "delete key", &format!(r"{}\{}", key, subkey))
        }
    }
}

#[cfg(not(windows))]
impl RegistryStore for HklmRegistry {
    fn key_exists(&self, _key: &str) -> Result<bool, RegistryError> {
        Err(RegistryError::Unsupported)
    }

    fn set_value(&self, _key: &str, _name: &str, _value: &RegValue) -> Result<(), RegistryError> {
        Err(RegistryError::Unsupported)
    }

    fn delete_value(&self, _key: &str, _name: &str) -> Result<bool, RegistryError> {
        Err(RegistryError::Unsupported)
    }

    fn delete_subkey(&self, _key: &str, _subkey: &str) -> Result<bool, RegistryError> {
        Err(RegistryError::Unsupported)
    }
}

// ============================================
// IN-MEMORY IMPLEMENTATION (tests)
// ============================================

#[cfg(test)]
pub use memory::MemoryRegistry;


// ============================================
// TESTS
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_kinds() {
        assert_eq!(RegValue::Sz("a".into()).kind(), "REG_SZ");
        assert_eq!(RegValue::MultiSz(vec![]).kind(), "REG_MULTI_SZ");
        assert_eq!(RegValue::Dword(1).kind(), "REG_DWORD");
        assert_eq!(
            RegValue::MultiSz(vec!["a".into(), "b".into()]).to_string(),
            "[a, b]"
        );
    }

    #[test]
    fn test_value_encoding() {
        assert_eq!(RegValue::Sz("ab".into()).encode(), vec![b'a', 0, b'b', 0, 0, 0]);
        assert_eq!(RegValue::Sz("é".into()).encode(), vec![0xE9, 0, 0, 0]);
        assert_eq!(
            RegValue::MultiSz(vec!["a".into(), "b".into()]).encode(),
            vec![b'a', 0, 0, 0, b'b', 0, 0, 0, 0, 0]
        );
        assert_eq!(RegValue::MultiSz(vec![]).encode(), vec![0, 0, 0, 0]);
        assert_eq!(RegValue::Dword(1).encode(), vec![1, 0, 0, 0]);
        assert_eq!(RegValue::Dword(0).encode(), vec![0, 0, 0, 0]);

        assert_eq!(RegValue::Sz(String::new()).type_code(), 1);
        assert_eq!(RegValue::Dword(0).type_code(), 4);
        assert_eq!(RegValue::MultiSz(vec![]).type_code(), 7);
    }

    #[test]
    fn test_hash_json_survives_encoding() {
        let json = r#"[{"CatalogHashValues": {"Key": "C:\\lab\\catalog.xml", "Value": "abc"}}]"#;
        let bytes = RegValue::Sz(json.to_string()).encode();
        assert_eq!(bytes.len(), (json.len() + 1) * 2);

        let units: Vec<u16> = bytes
            .chunks(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        assert_eq!(units.last(), Some(&0));
        assert_eq!(String::from_utf16(&units[..units.len() - 1]).unwrap(), json);
    }

    #[test]
    fn test_only_not_found_counts_as_absent() {
        assert!(check_status(ERROR_SUCCESS, "open", "K").unwrap());
        assert!(!check_status(ERROR_FILE_NOT_FOUND, "open", "K").unwrap());

        assert!(matches!(
            check_status(ERROR_ACCESS_DENIED, "delete value", r"K\V"),
            Err(RegistryError::AccessDenied(key)) if key == r"K\V"
        ));

        // ERROR_KEY_DELETED, ERROR_SHARING_VIOLATION: errors, never "absent"
        for code in [1018, 32] {
            let err = check_status(code, "delete key", r"K\IgnoreList").unwrap_err();
            assert!(matches!(err, RegistryError::Os { code: c, .. } if c == code));
            let message = err.to_string();
            assert!(message.contains(r"K\IgnoreList"));
            assert!(message.contains(&format!("error {}", code)));
        }
    }

    #[cfg(windows)]
    #[test]
    fn test_hklm_reads_live_registry() {
        let reg = HklmRegistry::new();
        assert!(reg.key_exists("SOFTWARE").unwrap());
        assert!(!reg.key_exists(r"SOFTWARE\catalogsetup-test-missing-key").unwrap());
    }

    #[cfg(not(windows))]
    #[test]
    fn test_hklm_unsupported_off_windows() {
        assert!(matches!(
            HklmRegistry::new().key_exists("SOFTWARE"),
            Err(RegistryError::Unsupported)
        ));
    }

    #[test]
    fn test_memory_registry_is_case_insensitive() {
        let reg = MemoryRegistry::new();
        reg.create_key(r"SOFTWARE\Dell\UpdateService\Service");
        assert!(reg.key_exists(r"software\dell\updateservice\service").unwrap());
        assert!(reg.key_exists(r"SOFTWARE\Dell").unwrap());

        reg.set_value(r"SOFTWARE\Dell", "Flag", &RegValue::Dword(1)).unwrap();
        assert_eq!(reg.get_value(r"software\dell", "flag"), Some(RegValue::Dword(1)));
    }

    #[test]
    fn test_memory_delete_subkey_removes_children() {
        let reg = MemoryRegistry::new();
        reg.create_key(r"Service\IgnoreList\Nested");
        assert!(reg.delete_subkey("Service", "IgnoreList").unwrap());
        assert!(!reg.key_exists(r"Service\IgnoreList\Nested").unwrap());
        assert!(reg.key_exists("Service").unwrap());
        assert!(!reg.delete_subkey("Service", "IgnoreList").unwrap());
    }

    #[test]
    fn test_memory_denied_key() {
        let reg = MemoryRegistry::new();
        reg.create_key(r"A\B");
        reg.deny("A");
        assert!(matches!(
            reg.set_value(r"A\B", "x", &RegValue::Dword(0)),
            Err(RegistryError::AccessDenied(_))
        ));
    }
}
