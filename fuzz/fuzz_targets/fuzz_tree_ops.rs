#![no_main]
use arbitrary::Arbitrary;
use archivefs::{ArchiveFileSystem, BasicEntry, BasicEntryFactory, EntryType, MknodOptions};
use libfuzzer_sys::fuzz_target;
use std::sync::Arc;

#[derive(Debug, Arbitrary)]
enum Op {
    Link {
        path: String,
        directory: bool,
        create_parents: bool,
        exclusive: bool,
    },
    Unlink {
        path: String,
    },
    SetTime {
        path: String,
        time: i64,
    },
}

#[derive(Debug, Arbitrary)]
struct Input {
    names: Vec<String>,
    ops: Vec<Op>,
}

fuzz_target!(|input: Input| {
    let entries = input.names.into_iter().map(|name| {
        if name.ends_with('/') {
            BasicEntry::directory(name)
        } else {
            BasicEntry::file(name)
        }
    });
    let Ok(mut fs) =
        ArchiveFileSystem::from_entries(Arc::new(BasicEntryFactory), entries, None, false)
    else {
        return;
    };
    fs.check_consistency().unwrap();

    for op in input.ops.iter().take(64) {
        let before = fs.len();
        let applied = match op {
            Op::Link {
                path,
                directory,
                create_parents,
                exclusive,
            } => {
                let entry_type = if *directory {
                    EntryType::Directory
                } else {
                    EntryType::File
                };
                let options = MknodOptions::new()
                    .create_parents(*create_parents)
                    .exclusive(*exclusive);
                match fs.mknod(path, entry_type, options, None) {
                    Ok(link) => link.run().is_ok(),
                    Err(_) => false,
                }
            }
            Op::Unlink { path } => fs.unlink(path).is_ok(),
            Op::SetTime { path, time } => fs
                .set_time(path, [archivefs::AccessType::Write], *time)
                .is_ok(),
        };

        fs.check_consistency().unwrap();
        if !applied {
            assert_eq!(fs.len(), before);
        }
    }
});
