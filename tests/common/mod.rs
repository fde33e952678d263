// tests/common/mod.rs

//! Shared fixtures for integration tests: a scratch device file, a kill
//! list and fake external binaries (shell scripts) standing in for the
//! converter, the volume tool and the pattern generator.
//!
//! The fakes agree on a simple container geometry: the first `header`
//! bytes of the device belong to the container, the rest is payload. The
//! fake converter honours `--align-payload` passthroughs, snapshots the
//! header-backup region before touching anything, and can be told to
//! report "suspended" for a number of legs via the `suspends` state file.

use convproof::{Engine, EngineConfig};
use std::fs::{self, File};
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Default size of the fake device: 8 MiB plus an odd tail, so off-by-one
/// arithmetic in range hashing would show up.
pub const FAKE_DEVICE_BYTES: u64 = 8 * 1024 * 1024 + 1536;

pub struct Sandbox {
    pub dir: TempDir,
    pub device: PathBuf,
    pub state_dir: PathBuf,
    pub mapper_dir: PathBuf,
    pub kill_list: PathBuf,
    convert_binary: PathBuf,
    volume_binary: PathBuf,
    pattern_binary: PathBuf,
}

impl Sandbox {
    pub fn new() -> Self {
        Self::with_device_size(FAKE_DEVICE_BYTES)
    }

    pub fn with_device_size(device_bytes: u64) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();

        let device = root.join("device.img");
        fs::write(&device, vec![0u8; device_bytes as usize]).unwrap();

        let kill_list = root.join("kill_list.txt");
        fs::write(
            &kill_list,
            format!("# devices this harness may destroy\n{}\n", device.display()),
        )
        .unwrap();

        let state_dir = root.join("state");
        fs::create_dir_all(&state_dir).unwrap();
        let mapper_dir = root.join("mapper");
        fs::create_dir_all(&mapper_dir).unwrap();

        let convert_binary = root.join("fake_convert");
        write_script(&convert_binary, &fake_converter_script(&state_dir));
        let volume_binary = root.join("fake_cryptsetup");
        write_script(
            &volume_binary,
            &fake_volume_tool_script(&state_dir, &mapper_dir),
        );
        let pattern_binary = root.join("fake_prng");
        write_script(
            &pattern_binary,
            "#!/bin/sh\nyes \"pattern-$2\" | head -c \"$1\"\n",
        );

        Sandbox {
            dir,
            device,
            state_dir,
            mapper_dir,
            kill_list,
            convert_binary,
            volume_binary,
            pattern_binary,
        }
    }

    pub fn config(&self) -> EngineConfig {
        EngineConfig {
            device: self.device.clone(),
            convert_binary: self.convert_binary.clone(),
            volume_binary: self.volume_binary.clone(),
            pattern_binary: self.pattern_binary.clone(),
            log_dir: self.dir.path().join("logs"),
            data_dir: self.dir.path().join("data"),
            kill_list: self.kill_list.clone(),
            passthrough: Vec::new(),
            mapper_dir: Some(self.mapper_dir.clone()),
        }
    }

    pub fn engine(&self) -> Engine {
        Engine::new(self.config()).unwrap()
    }

    /// Make the fake converter report "suspended" for the next `legs`
    /// conversion legs before it completes.
    pub fn set_suspends(&self, legs: u32) {
        fs::write(self.state_dir.join("suspends"), format!("{}\n", legs)).unwrap();
    }

    pub fn log_dir(&self) -> PathBuf {
        self.dir.path().join("logs")
    }
}

pub fn write_script(path: &Path, body: &str) {
    let mut file = File::create(path).unwrap();
    file.write_all(body.as_bytes()).unwrap();
    let mut perms = fs::metadata(path).unwrap().permissions();
    perms.set_mode(0o755);
    fs::set_permissions(path, perms).unwrap();
}

/// Fake in-place converter.
///
/// Leg one snapshots the device into the backup file, stashes the payload
/// source and writes a fresh key. While the `suspends` state file holds a
/// positive count, each leg decrements it and exits with the suspended
/// sentinel; the final leg rewrites the device as zeroed header + shifted
/// payload and records the header size for the fake volume tool.
fn fake_converter_script(state_dir: &Path) -> String {
    format!(
        r#"#!/bin/sh
STATE="{state}"
HDR=2097152
DEV=""; KEY=""; BACKUP=""; RESUME_FILE=""; RESUME=0; READDEV=""
while [ $# -gt 0 ]; do
    case "$1" in
        -d) DEV="$2"; shift 2 ;;
        -l) shift 2 ;;
        --keyfile) KEY="$2"; shift 2 ;;
        --backupfile) BACKUP="$2"; shift 2 ;;
        --resume-file) RESUME_FILE="$2"; shift 2 ;;
        --resume) RESUME=1; shift ;;
        --readdev) READDEV="$2"; shift 2 ;;
        --luksparams=--align-payload=*) HDR=$(( ${{1#--luksparams=--align-payload=}} * 512 )); shift ;;
        *) shift ;;
    esac
done
if [ "$RESUME" = "0" ]; then
    cat "$DEV" > "$BACKUP"
    SRC="$DEV"
    [ -n "$READDEV" ] && SRC="$READDEV"
    cat "$SRC" > "$STATE/payload.bin"
    printf 'fresh-key' > "$KEY"
fi
LEFT=0
[ -f "$STATE/suspends" ] && LEFT=$(cat "$STATE/suspends")
if [ "$LEFT" -gt 0 ]; then
    echo $(( LEFT - 1 )) > "$STATE/suspends"
    printf 'progress' > "$RESUME_FILE"
    echo "conversion suspended, resume file written"
    exit 2
fi
SIZE=$(wc -c < "$DEV")
PAYLOAD=$(( SIZE - HDR ))
{{ head -c "$HDR" /dev/zero; head -c "$PAYLOAD" "$STATE/payload.bin"; }} > "$STATE/converted.bin"
cat "$STATE/converted.bin" > "$DEV"
echo "$HDR" > "$STATE/header_bytes"
rm -f "$RESUME_FILE"
echo "conversion complete"
exit 0
"#,
        state = state_dir.display()
    )
}

/// Fake volume tool.
///
/// `luksOpen` exposes the device tail (after the recorded header size) as
/// a snapshot file under the mapper directory; `luksClose` writes the
/// snapshot back into the device tail, which is what the real
/// device-mapper path would have done on every write.
fn fake_volume_tool_script(state_dir: &Path, mapper_dir: &Path) -> String {
    format!(
        r#"#!/bin/sh
STATE="{state}"
MAPPER="{mapper}"
case "$1" in
    luksFormat)
        for last in "$@"; do :; done
        printf 'LUKS' | dd of="$last" conv=notrunc 2>/dev/null
        echo 2097152 > "$STATE/header_bytes"
        ;;
    luksOpen)
        DEV="$2"; NAME="$3"
        HDR=$(cat "$STATE/header_bytes")
        tail -c +$(( HDR + 1 )) "$DEV" > "$MAPPER/$NAME"
        echo "$DEV" > "$MAPPER/$NAME.dev"
        ;;
    luksClose)
        NAME="$2"
        DEV=$(cat "$MAPPER/$NAME.dev")
        HDR=$(cat "$STATE/header_bytes")
        head -c "$HDR" "$DEV" > "$STATE/head.bin"
        cat "$STATE/head.bin" "$MAPPER/$NAME" > "$STATE/full.bin"
        cat "$STATE/full.bin" > "$DEV"
        rm -f "$MAPPER/$NAME" "$MAPPER/$NAME.dev"
        ;;
esac
exit 0
"#,
        state = state_dir.display(),
        mapper = mapper_dir.display()
    )
}
