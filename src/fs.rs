// Read-only boot filesystem: the storage collaborator behind open/read/execute
use core::fmt;

use crate::config::FILENAME_SIZE;

const BLOCK_SIZE: usize = 4096;
const DENTRY_SIZE: usize = 64;
const MAX_DENTRIES: usize = 63;
const BOOT_HEADER_SIZE: usize = 64;
const MAX_INODE_BLOCKS: usize = 1023;

/// Type tag stored in a directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    /// The periodic timer device node.
    Rtc,
    Directory,
    Regular,
}

impl FileType {
    fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(FileType::Rtc),
            1 => Some(FileType::Directory),
            2 => Some(FileType::Regular),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirEntry {
    name: [u8; FILENAME_SIZE],
    pub file_type: FileType,
    pub inode: u32,
}

impl DirEntry {
    pub fn new(name: &[u8], file_type: FileType, inode: u32) -> Self {
        let mut stored = [0u8; FILENAME_SIZE];
        let len = name.len().min(FILENAME_SIZE);
        stored[..len].copy_from_slice(&name[..len]);
        Self { name: stored, file_type, inode }
    }

    /// Name without NUL padding; names of exactly 32 bytes are unterminated.
    pub fn name(&self) -> &[u8] {
        let len = self
            .name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(FILENAME_SIZE);
        &self.name[..len]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    BadInode,
    /// An inode points at a data block outside the image.
    CorruptBlock,
}

impl fmt::Display for FsError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FsError::BadInode => write!(f, "Inode out of range"),
            FsError::CorruptBlock => write!(f, "Data block index out of range"),
        }
    }
}

/// Name/index lookup and offset-bounded reads.
pub trait Storage {
    fn lookup_by_name(&self, name: &[u8]) -> Option<DirEntry>;

    /// `None` once `index` runs past the last entry.
    fn lookup_by_index(&self, index: usize) -> Option<DirEntry>;

    /// Copy file bytes starting at `offset` into `buf`.
    ///
    /// Short read at end of file, 0 when `offset` is at or past it.
    fn read_bytes(&self, inode: u32, offset: u32, buf: &mut [u8]) -> Result<usize, FsError>;
}

/// A filesystem image in the boot-block layout, borrowed from memory.
pub struct BootImage<'a> {
    bytes: &'a [u8],
    num_dentries: usize,
    num_inodes: usize,
    num_blocks: usize,
}

impl<'a> BootImage<'a> {
    pub fn new(bytes: &'a [u8]) -> Option<Self> {
        if bytes.len() < BLOCK_SIZE {
            return None;
        }
        let num_dentries = read_u32(bytes, 0) as usize;
        let num_inodes = read_u32(bytes, 4) as usize;
        let num_blocks = read_u32(bytes, 8) as usize;
        if num_dentries > MAX_DENTRIES {
            return None;
        }
        if bytes.len() < (1 + num_inodes + num_blocks) * BLOCK_SIZE {
            return None;
        }
        Some(Self {
            bytes,
            num_dentries,
            num_inodes,
            num_blocks,
        })
    }

    fn dentry(&self, index: usize) -> Option<DirEntry> {
        let base = BOOT_HEADER_SIZE + index * DENTRY_SIZE;
        let raw = &self.bytes[base..base + DENTRY_SIZE];
        let file_type = FileType::from_raw(read_u32(raw, FILENAME_SIZE))?;
        let inode = read_u32(raw, FILENAME_SIZE + 4);
        Some(DirEntry::new(&raw[..FILENAME_SIZE], file_type, inode))
    }

    fn inode_base(&self, inode: u32) -> usize {
        (1 + inode as usize) * BLOCK_SIZE
    }

    fn block(&self, index: usize) -> &[u8] {
        let base = (1 + self.num_inodes + index) * BLOCK_SIZE;
        &self.bytes[base..base + BLOCK_SIZE]
    }
}

impl Storage for BootImage<'_> {
    fn lookup_by_name(&self, name: &[u8]) -> Option<DirEntry> {
        if name.is_empty() || name.len() > FILENAME_SIZE {
            return None;
        }
        (0..self.num_dentries)
            .filter_map(|i| self.dentry(i))
            .find(|entry| entry.name() == name)
    }

    fn lookup_by_index(&self, index: usize) -> Option<DirEntry> {
        if index >= self.num_dentries {
            return None;
        }
        self.dentry(index)
    }

    fn read_bytes(&self, inode: u32, offset: u32, buf: &mut [u8]) -> Result<usize, FsError> {
        if inode as usize >= self.num_inodes {
            return Err(FsError::BadInode);
        }
        let inode_base = self.inode_base(inode);
        let length = read_u32(self.bytes, inode_base) as usize;
        let offset = offset as usize;
        if offset >= length {
            return Ok(0);
        }

        let wanted = buf.len().min(length - offset);
        let mut copied = 0;
        while copied < wanted {
            let position = offset + copied;
            let slot = position / BLOCK_SIZE;
            if slot >= MAX_INODE_BLOCKS {
                return Err(FsError::CorruptBlock);
            }
            let block_index = read_u32(self.bytes, inode_base + 4 + slot * 4) as usize;
            if block_index >= self.num_blocks {
                return Err(FsError::CorruptBlock);
            }
            let within = position % BLOCK_SIZE;
            let chunk = (BLOCK_SIZE - within).min(wanted - copied);
            buf[copied..copied + chunk]
                .copy_from_slice(&self.block(block_index)[within..within + chunk]);
            copied += chunk;
        }
        Ok(copied)
    }
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Lays out an image: one inode per file, blocks allocated in order.
    fn build_image(files: &[(&str, u32, &[u8])]) -> Vec<u8> {
        let block_counts: Vec<usize> = files
            .iter()
            .map(|(_, _, data)| data.len().div_ceil(BLOCK_SIZE))
            .collect();
        let num_inodes = files.len();
        let num_blocks: usize = block_counts.iter().sum();
        let mut image = vec![0u8; (1 + num_inodes + num_blocks) * BLOCK_SIZE];

        image[0..4].copy_from_slice(&(files.len() as u32).to_le_bytes());
        image[4..8].copy_from_slice(&(num_inodes as u32).to_le_bytes());
        image[8..12].copy_from_slice(&(num_blocks as u32).to_le_bytes());

        let mut next_block = 0usize;
        for (i, (name, kind, data)) in files.iter().enumerate() {
            let dentry = BOOT_HEADER_SIZE + i * DENTRY_SIZE;
            image[dentry..dentry + name.len()].copy_from_slice(name.as_bytes());
            image[dentry + 32..dentry + 36].copy_from_slice(&kind.to_le_bytes());
            image[dentry + 36..dentry + 40].copy_from_slice(&(i as u32).to_le_bytes());

            let inode = (1 + i) * BLOCK_SIZE;
            image[inode..inode + 4].copy_from_slice(&(data.len() as u32).to_le_bytes());
            for (slot, chunk) in data.chunks(BLOCK_SIZE).enumerate() {
                let at = inode + 4 + slot * 4;
                image[at..at + 4].copy_from_slice(&(next_block as u32).to_le_bytes());
                let base = (1 + num_inodes + next_block) * BLOCK_SIZE;
                image[base..base + chunk.len()].copy_from_slice(chunk);
                next_block += 1;
            }
        }
        image
    }

    #[test]
    fn lookup_matches_whole_names_only() {
        let image = build_image(&[(".", 1, b""), ("frame0.txt", 2, b"fish"), ("rtc", 0, b"")]);
        let fs = BootImage::new(&image).unwrap();

        let entry = fs.lookup_by_name(b"frame0.txt").unwrap();
        assert_eq!(entry.file_type, FileType::Regular);
        assert_eq!(entry.name(), b"frame0.txt");
        assert!(fs.lookup_by_name(b"frame0").is_none());
        assert!(fs.lookup_by_name(b"frame0.txt2").is_none());
        assert!(fs.lookup_by_name(b"").is_none());
        assert_eq!(fs.lookup_by_name(b"rtc").unwrap().file_type, FileType::Rtc);
    }

    #[test]
    fn thirty_two_byte_names_are_unterminated() {
        let long = "verylargetextwithverylongname.tx";
        assert_eq!(long.len(), 32);
        let image = build_image(&[(long, 2, b"x")]);
        let fs = BootImage::new(&image).unwrap();
        assert_eq!(fs.lookup_by_name(long.as_bytes()).unwrap().name().len(), 32);
    }

    #[test]
    fn index_lookup_ends() {
        let image = build_image(&[(".", 1, b""), ("a", 2, b"1")]);
        let fs = BootImage::new(&image).unwrap();
        assert_eq!(fs.lookup_by_index(1).unwrap().name(), b"a");
        assert!(fs.lookup_by_index(2).is_none());
    }

    #[test]
    fn reads_cross_blocks_and_stop_at_eof() {
        let data: Vec<u8> = (0..BLOCK_SIZE + 100).map(|i| (i % 251) as u8).collect();
        let image = build_image(&[("big", 2, &data)]);
        let fs = BootImage::new(&image).unwrap();

        let mut buf = [0u8; 200];
        let n = fs.read_bytes(0, (BLOCK_SIZE - 50) as u32, &mut buf).unwrap();
        assert_eq!(n, 150);
        assert_eq!(&buf[..n], &data[BLOCK_SIZE - 50..]);

        assert_eq!(fs.read_bytes(0, data.len() as u32, &mut buf), Ok(0));
        assert_eq!(fs.read_bytes(0, data.len() as u32 + 10, &mut buf), Ok(0));
        assert_eq!(fs.read_bytes(7, 0, &mut buf), Err(FsError::BadInode));
    }

    #[test]
    fn truncated_images_are_rejected() {
        let image = build_image(&[("a", 2, b"hello")]);
        assert!(BootImage::new(&image[..image.len() - 1]).is_none());
    }
}
