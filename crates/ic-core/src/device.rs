//! Collaborator device interfaces
//!
//! The CPU and kernel layers consume graphics, filesystem and shader
//! compilation services through these opaque contracts. Real backends
//! live outside this workspace; the null implementations keep the
//! emulation core testable without them.

/// Opaque handle to a device-side resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceHandle(pub u32);

/// Opaque handle to a compiled shader
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShaderHandle(pub u32);

/// File metadata returned by [`FileSystemDevice::stat`]
#[derive(Debug, Clone, Copy, Default)]
pub struct FileStat {
    pub size: u64,
    pub is_directory: bool,
}

/// Graphics device contract
pub trait GraphicsDevice: Send + Sync {
    /// Create a buffer or texture resource of `size` bytes
    fn create_resource(&self, size: usize) -> Result<ResourceHandle, String>;

    /// Create a command buffer for later submission
    fn create_command_buffer(&self) -> Result<ResourceHandle, String>;

    /// Present the current frame
    fn swap(&self);
}

/// Filesystem device contract, addressed by virtual path
pub trait FileSystemDevice: Send + Sync {
    fn open(&self, path: &str) -> Result<u32, String>;
    fn read(&self, fd: u32, buf: &mut [u8]) -> Result<usize, String>;
    fn write(&self, fd: u32, buf: &[u8]) -> Result<usize, String>;
    fn stat(&self, path: &str) -> Result<FileStat, String>;
    fn close(&self, fd: u32);
}

/// Shader compilation service: vendor microcode in, compiled shader out
pub trait ShaderCompiler: Send + Sync {
    fn compile(&self, microcode: &[u8]) -> Result<ShaderHandle, String>;
}

/// Null graphics device (does nothing)
pub struct NullGraphics;

impl GraphicsDevice for NullGraphics {
    fn create_resource(&self, _size: usize) -> Result<ResourceHandle, String> {
        Ok(ResourceHandle(0))
    }

    fn create_command_buffer(&self) -> Result<ResourceHandle, String> {
        Ok(ResourceHandle(0))
    }

    fn swap(&self) {}
}

/// Null filesystem (an empty volume)
pub struct NullFileSystem;

impl FileSystemDevice for NullFileSystem {
    fn open(&self, path: &str) -> Result<u32, String> {
        Err(format!("no such file: {path}"))
    }

    fn read(&self, _fd: u32, _buf: &mut [u8]) -> Result<usize, String> {
        Ok(0)
    }

    fn write(&self, _fd: u32, buf: &[u8]) -> Result<usize, String> {
        Ok(buf.len())
    }

    fn stat(&self, path: &str) -> Result<FileStat, String> {
        Err(format!("no such file: {path}"))
    }

    fn close(&self, _fd: u32) {}
}

/// Null shader compiler (returns a dummy handle)
pub struct NullShaderCompiler;

impl ShaderCompiler for NullShaderCompiler {
    fn compile(&self, _microcode: &[u8]) -> Result<ShaderHandle, String> {
        Ok(ShaderHandle(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_graphics() {
        let dev = NullGraphics;
        assert!(dev.create_resource(64).is_ok());
        assert!(dev.create_command_buffer().is_ok());
        dev.swap();
    }

    #[test]
    fn test_null_filesystem() {
        let fs = NullFileSystem;
        assert!(fs.open("/dev_hdd0/game").is_err());
        assert!(fs.stat("/dev_hdd0/game").is_err());
        assert_eq!(fs.read(0, &mut [0u8; 8]).unwrap(), 0);
        assert_eq!(fs.write(0, &[1, 2, 3]).unwrap(), 3);
        fs.close(0);
    }

    #[test]
    fn test_null_shader_compiler() {
        let compiler = NullShaderCompiler;
        assert_eq!(compiler.compile(&[0u8; 16]).unwrap(), ShaderHandle(0));
    }
}
