#![no_main]

use libfuzzer_sys::fuzz_target;
use readsimple_root::RootFile;
use std::path::PathBuf;

fuzz_target!(|data: &[u8]| {
    let Ok(file) = RootFile::from_bytes(data.to_vec(), PathBuf::from("fuzz.root")) else {
        return;
    };
    let Ok(keys) = file.list_keys() else {
        return;
    };
    for key in keys.iter().take(8) {
        let Ok(tree) = file.get_tree(&key.name) else {
            continue;
        };
        let names: Vec<&str> = tree.branch_names().into_iter().take(4).collect();
        if let Ok(mut sc) = file.scanner(&tree, &names) {
            for _ in 0..16 {
                if !sc.next() || sc.scan().is_err() {
                    break;
                }
            }
        }
    }
});
