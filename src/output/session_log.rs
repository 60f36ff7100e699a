//! 会话日志文件
//!
//! 文件在程序整个生命周期内以追加模式写入，每次挖矿会话用起止横幅分隔。
//! 每写一行都立即刷新，崩溃时最多丢失正在写的那一行。

use chrono::Local;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

pub struct SessionLog {
    path: PathBuf,
    file: File,
}

impl SessionLog {
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 写入会话开始横幅，返回本次会话在文件中的起始偏移
    pub fn begin(&mut self) -> io::Result<u64> {
        let offset = self.file.seek(SeekFrom::End(0))?;
        let banner = format!(
            "\n=== session started {} ===\n",
            Local::now().format("%Y-%m-%d %H:%M:%S")
        );
        self.write_flush(&banner)?;
        Ok(offset)
    }

    /// 追加一行 `[HH:MM:SS] 内容`
    pub fn append(&mut self, line: &str) -> io::Result<()> {
        let entry = format!("[{}] {}\n", Local::now().format("%H:%M:%S"), line);
        self.write_flush(&entry)
    }

    /// 写入会话结束横幅
    pub fn end(&mut self) -> io::Result<()> {
        let banner = format!(
            "=== session ended {} ===\n\n",
            Local::now().format("%Y-%m-%d %H:%M:%S")
        );
        self.write_flush(&banner)
    }

    fn write_flush(&mut self, text: &str) -> io::Result<()> {
        self.file.write_all(text.as_bytes())?;
        self.file.flush()
    }

    /// 从指定偏移读取到文件末尾（只读，供连接监测使用）
    pub fn read_since(path: impl AsRef<Path>, offset: u64) -> io::Result<String> {
        let mut file = File::open(path)?;
        file.seek(SeekFrom::Start(offset))?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}
