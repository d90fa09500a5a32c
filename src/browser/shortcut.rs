//! Desktop shortcut files for deep links.

use std::path::Path;

use anyhow::{Context, Result};

/// Write a Linux `.desktop` launcher that reopens the browser at a deep
/// link. The file is marked executable so desktops trust it.
pub fn write_desktop_file(
    path: &Path,
    name: &str,
    exec_path: &Path,
    deep_link: &str,
    icon: Option<&Path>,
) -> Result<()> {
    let invocation = format!(
        "{} browse --path '{}'",
        exec_path.display(),
        deep_link.replace('\'', "'\\''")
    );
    let mut content = String::from("[Desktop Entry]\n");
    content.push_str("Type=Application\n");
    content.push_str(&format!("Name={name}\n"));
    content.push_str(&format!("Exec=/bin/bash -lc '{}'\n", invocation.replace('\'', "'\\''")));
    if let Some(icon) = icon {
        content.push_str(&format!("Icon={}\n", icon.display()));
    }
    content.push_str("Terminal=false\n");

    std::fs::write(path, content)
        .with_context(|| format!("writing shortcut {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
            .with_context(|| format!("marking {} executable", path.display()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_desktop_file_fields_and_mode() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("Jobs.desktop");
        write_desktop_file(
            &path,
            "My Jobs",
            Path::new("/usr/local/bin/hibrowse"),
            "/[h1:8888]/hopper/<Show:jobstate:Running>",
            Some(Path::new("/usr/share/icons/job.png")),
        )
        .unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("[Desktop Entry]\n"));
        assert!(content.contains("Type=Application\n"));
        assert!(content.contains("Name=My Jobs\n"));
        assert!(content.contains("Exec=/bin/bash -lc"));
        assert!(content.contains("--path"));
        assert!(content.contains("<Show:jobstate:Running>"));
        assert!(content.contains("Icon=/usr/share/icons/job.png\n"));
        assert!(content.contains("Terminal=false\n"));

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o755);
        }
    }
}
