use flatfs::io::FileBlockEmulatorBuilder;
use flatfs::{FsOptions, StorageManager};

pub fn main() {
    let tmp = tempfile::tempfile().unwrap();
    let dev = FileBlockEmulatorBuilder::from(tmp)
        .with_block_count(10)
        .with_block_size(128)
        .build()
        .expect("Could not initialize disk emulator.");

    // create a new volume on the device and store a multi-block file
    let fs = StorageManager::new(dev, FsOptions::default()).expect("should create");
    fs.create("hello.txt").unwrap();
    fs.write("hello.txt", "hello, block world! ".repeat(10).as_bytes())
        .unwrap();

    let content = fs.read("hello.txt").unwrap();
    println!("{}", String::from_utf8_lossy(&content));
    println!(
        "files: {:?}, free blocks: {}",
        fs.list().unwrap(),
        fs.free_blocks().unwrap()
    );
}
