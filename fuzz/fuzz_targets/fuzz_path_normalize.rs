#![no_main]
use archivefs::core::path::{canonicalize, normalize, split};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|name: &str| {
    let _ = normalize(name, '/');

    let Ok(path) = canonicalize(name) else {
        assert!(name.contains('\0'));
        return;
    };

    assert!(path.starts_with('/'));
    assert!(path == "/" || !path.ends_with('/'));
    assert!(!path.split('/').any(|segment| segment == "." || segment == ".."));
    assert_eq!(canonicalize(&path).unwrap(), path);

    if let Some((parent, base)) = split(&path) {
        assert!(!base.is_empty());
        assert!(parent.starts_with('/'));
    }
});
