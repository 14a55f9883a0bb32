//! The `service` type: keep daemons running (or stopped) and enabled

use crate::command;
use crate::error::{Error, Result};
use crate::facts::{Facts, KERNEL, OPERATING_SYSTEM};
use crate::property::Comparator;
use crate::provider::{Confine, Feature, Provider, ProviderContext, ProviderDescriptor};
use crate::registry::{ParamSpec, PropertySpec, Registry, TypeDefinition};
use crate::value::{Attributes, ResourceRef, Value};
use std::path::{Path, PathBuf};

pub(super) fn register(registry: &mut Registry, facts: &Facts) -> Result<()> {
    registry.define_type(definition())?;
    registry.register_provider(init(facts))?;
    registry.register_provider(systemd())?;
    registry.register_provider(base())?;
    Ok(())
}

fn definition() -> TypeDefinition {
    TypeDefinition::new("service")
        .doc("Manage running services. Start/stop verbs come from the provider or from explicit commands.")
        .property(
            PropertySpec::new("ensure")
                .doc("Whether the service should be running")
                .allowed(&["running", "stopped"])
                .comparator(Comparator::Ensure),
        )
        .property(
            PropertySpec::new("enable")
                .doc("Whether the service should start at boot")
                .allowed(&["true", "false"]),
        )
        .parameter(ParamSpec::new("name").doc("Service name; defaults to the title"))
        .parameter(ParamSpec::new("path").doc("Directories searched for init scripts"))
        .parameter(
            ParamSpec::new("hasstatus")
                .doc("The init script has a working `status` verb")
                .allowed(&["true", "false"]),
        )
        .parameter(
            ParamSpec::new("hasrestart")
                .doc("The init script has a working `restart` verb")
                .allowed(&["true", "false"]),
        )
        .parameter(ParamSpec::new("pattern").doc("Process-table pattern; defaults to binary or name"))
        .parameter(ParamSpec::new("binary").doc("Daemon executable"))
        .parameter(ParamSpec::new("start").doc("Command that starts the service"))
        .parameter(ParamSpec::new("stop").doc("Command that stops the service"))
        .parameter(ParamSpec::new("status").doc("Command whose exit status reports running"))
        .parameter(ParamSpec::new("restart").doc("Command that restarts the service"))
        .validator(absolute_search_paths)
}

fn absolute_search_paths(reference: &ResourceRef, attributes: &Attributes) -> Result<()> {
    let Some(paths) = attributes.get("path") else {
        return Ok(());
    };
    for dir in paths.to_list() {
        if !Path::new(&dir).is_absolute() {
            return Err(Error::validation(
                reference.to_string(),
                "path",
                format!("search path '{}' must be absolute", dir),
            ));
        }
    }
    Ok(())
}

fn init(facts: &Facts) -> ProviderDescriptor {
    let is_freebsd = facts
        .get(OPERATING_SYSTEM)
        .is_some_and(|os| os.eq_ignore_ascii_case("FreeBSD"));
    let scripts = if is_freebsd { "/etc/rc.d" } else { "/etc/init.d" };

    ProviderDescriptor::new("service", "init", InitService)
        .doc("Init-script services. Status is only trusted with `hasstatus`.")
        .type_default()
        .feature(Feature::Status)
        .feature(Feature::Refreshable)
        .feature(Feature::Discoverable)
        .search_path(scripts)
}

fn systemd() -> ProviderDescriptor {
    ProviderDescriptor::new("service", "systemd", Systemd)
        .doc("Units managed through systemctl")
        .confine(Confine::fact(KERNEL, &["Linux"]))
        .confine(Confine::Command("systemctl".to_string()))
        .default_for(
            OPERATING_SYSTEM,
            &["Debian", "Ubuntu", "Fedora", "CentOS", "RedHat", "Arch"],
        )
        .command("systemctl", "systemctl")
        .feature(Feature::Status)
        .feature(Feature::Enableable)
        .feature(Feature::Refreshable)
}

fn base() -> ProviderDescriptor {
    ProviderDescriptor::new("service", "base", BaseService)
        .doc("Fallback using explicit start/stop/status commands and the process table")
        .feature(Feature::Refreshable)
}

fn service_name<'c>(ctx: &'c ProviderContext<'_>) -> &'c str {
    ctx.param_str("name").unwrap_or(&ctx.resource.name)
}

/// Process-table pattern: `pattern`, else `binary`, else the name
fn pattern<'c>(ctx: &'c ProviderContext<'_>) -> &'c str {
    ctx.param_str("pattern")
        .or_else(|| ctx.param_str("binary"))
        .unwrap_or_else(|| service_name(ctx))
}

/// Run a user-supplied command that must succeed
fn shell_checked(ctx: &ProviderContext<'_>, script: &str) -> Result<()> {
    if ctx.execute_shell(script)? {
        Ok(())
    } else {
        Err(Error::CommandFailed {
            command: script.to_string(),
        })
    }
}

fn unsupported(ctx: &ProviderContext<'_>, property: &str) -> Error {
    Error::Unsupported {
        provider: ctx.descriptor.name.clone(),
        property: property.to_string(),
    }
}

fn ensure_value(running: bool) -> Value {
    Value::from(if running { "running" } else { "stopped" })
}

/// Generic status: an explicit `status` command, else the process table
/// A stopped service stays stopped when notified
fn not_restarted(ctx: &ProviderContext<'_>) -> bool {
    ctx.debug("Not restarting stopped service");
    false
}

fn generic_status(ctx: &ProviderContext<'_>) -> Result<bool> {
    match ctx.param_str("status") {
        Some(script) => ctx.execute_shell(script),
        None => ctx.process_running(pattern(ctx)),
    }
}

/// Services controlled by scripts in an init directory
struct InitService;

impl InitService {
    fn script(ctx: &ProviderContext<'_>) -> Result<PathBuf> {
        let paths: Vec<PathBuf> = match ctx.param("path") {
            Some(value) => value.to_list().into_iter().map(PathBuf::from).collect(),
            None => ctx.descriptor.search_paths().to_vec(),
        };
        command::locate_command(service_name(ctx), &paths)
    }

    fn running(ctx: &ProviderContext<'_>) -> Result<bool> {
        if ctx.param_str("status").is_none()
            && ctx.has_feature(Feature::Status)
            && ctx.param_bool("hasstatus")
        {
            let script = Self::script(ctx)?;
            return ctx.execute(&script, &["status"]);
        }
        generic_status(ctx)
    }

    fn verb(ctx: &ProviderContext<'_>, verb: &str) -> Result<()> {
        match ctx.param_str(verb) {
            Some(custom) => shell_checked(ctx, custom),
            None => {
                let script = Self::script(ctx)?;
                ctx.execute_checked(&script, &[verb])
            }
        }
    }
}

impl Provider for InitService {
    fn retrieve(&self, ctx: &ProviderContext<'_>, property: &str) -> Result<Value> {
        match property {
            "ensure" => Ok(ensure_value(Self::running(ctx)?)),
            other => Err(unsupported(ctx, other)),
        }
    }

    fn sync(&self, ctx: &ProviderContext<'_>, property: &str, should: &Value) -> Result<()> {
        match (property, should.as_str()) {
            ("ensure", Some("running")) => Self::verb(ctx, "start"),
            ("ensure", Some("stopped")) => Self::verb(ctx, "stop"),
            (other, _) => Err(unsupported(ctx, other)),
        }
    }

    fn refresh(&self, ctx: &ProviderContext<'_>) -> Result<bool> {
        if !Self::running(ctx)? {
            return Ok(not_restarted(ctx));
        }
        if let Some(custom) = ctx.param_str("restart") {
            shell_checked(ctx, custom)?;
        } else if ctx.param_bool("hasrestart") {
            Self::verb(ctx, "restart")?;
        } else {
            Self::verb(ctx, "stop")?;
            Self::verb(ctx, "start")?;
        }
        Ok(true)
    }
}

/// Units controlled through systemctl
struct Systemd;

impl Systemd {
    fn systemctl(ctx: &ProviderContext<'_>, args: &[&str]) -> Result<bool> {
        let systemctl = ctx.locate_command("systemctl")?;
        let mut full = args.to_vec();
        full.push(service_name(ctx));
        ctx.execute(&systemctl, &full)
    }

    fn running(ctx: &ProviderContext<'_>) -> Result<bool> {
        match ctx.param_str("status") {
            Some(script) => ctx.execute_shell(script),
            None => Self::systemctl(ctx, &["is-active", "--quiet"]),
        }
    }

    fn systemctl_checked(ctx: &ProviderContext<'_>, verb: &str) -> Result<()> {
        if Self::systemctl(ctx, &[verb])? {
            Ok(())
        } else {
            Err(Error::CommandFailed {
                command: format!("systemctl {} {}", verb, service_name(ctx)),
            })
        }
    }
}

impl Provider for Systemd {
    fn retrieve(&self, ctx: &ProviderContext<'_>, property: &str) -> Result<Value> {
        match property {
            "ensure" => Ok(ensure_value(Self::running(ctx)?)),
            "enable" => Ok(Value::Bool(Self::systemctl(ctx, &["is-enabled", "--quiet"])?)),
            other => Err(unsupported(ctx, other)),
        }
    }

    fn sync(&self, ctx: &ProviderContext<'_>, property: &str, should: &Value) -> Result<()> {
        match property {
            "ensure" => match should.as_str() {
                Some("running") => Self::systemctl_checked(ctx, "start"),
                _ => Self::systemctl_checked(ctx, "stop"),
            },
            "enable" => {
                if should.as_bool().unwrap_or(false) {
                    Self::systemctl_checked(ctx, "enable")
                } else {
                    Self::systemctl_checked(ctx, "disable")
                }
            }
            other => Err(unsupported(ctx, other)),
        }
    }

    fn refresh(&self, ctx: &ProviderContext<'_>) -> Result<bool> {
        if !Self::running(ctx)? {
            return Ok(not_restarted(ctx));
        }
        match ctx.param_str("restart") {
            Some(custom) => shell_checked(ctx, custom)?,
            None => Self::systemctl_checked(ctx, "restart")?,
        }
        Ok(true)
    }
}

/// Explicit commands plus the process table
struct BaseService;

impl BaseService {
    fn start(ctx: &ProviderContext<'_>) -> Result<()> {
        let Some(start) = ctx.param_str("start") else {
            return Err(Error::validation(
                ctx.resource.to_string(),
                "start",
                "the base provider needs a start command",
            ));
        };
        shell_checked(ctx, start)
    }

    fn stop(ctx: &ProviderContext<'_>) -> Result<()> {
        if let Some(stop) = ctx.param_str("stop") {
            return shell_checked(ctx, stop);
        }
        let pkill = command::locate_command("pkill", &[]).unwrap_or_else(|_| PathBuf::from("pkill"));
        ctx.execute_checked(&pkill, &["-f", pattern(ctx)])
    }
}

impl Provider for BaseService {
    fn retrieve(&self, ctx: &ProviderContext<'_>, property: &str) -> Result<Value> {
        match property {
            "ensure" => Ok(ensure_value(generic_status(ctx)?)),
            other => Err(unsupported(ctx, other)),
        }
    }

    fn sync(&self, ctx: &ProviderContext<'_>, property: &str, should: &Value) -> Result<()> {
        match (property, should.as_str()) {
            ("ensure", Some("running")) => Self::start(ctx),
            ("ensure", Some("stopped")) => Self::stop(ctx),
            (other, _) => Err(unsupported(ctx, other)),
        }
    }

    fn refresh(&self, ctx: &ProviderContext<'_>) -> Result<bool> {
        if !generic_status(ctx)? {
            return Ok(not_restarted(ctx));
        }
        match ctx.param_str("restart") {
            Some(custom) => shell_checked(ctx, custom)?,
            None => {
                Self::stop(ctx)?;
                Self::start(ctx)?;
            }
        }
        Ok(true)
    }
}
