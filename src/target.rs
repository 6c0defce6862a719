//! Description of the target node: predefined variables, local events and
//! native functions, in the JSON layout used by the robot firmware tools.
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDescription {
    pub name: String,
    /// Total number of 16-bit words of variable memory.
    pub max_var_size: usize,
    pub variables: Vec<VariableDescription>,
    #[serde(default)]
    pub local_events: Vec<EventDescription>,
    #[serde(default)]
    pub native_functions: Vec<NativeFunction>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableDescription {
    pub name: String,
    pub size: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventDescription {
    pub name: String,
}

/// A function implemented by the firmware.
///
/// Each entry of `args` is a size code: a positive value is a fixed size,
/// `0` is any size (passed to the function as an extra stack value) and
/// `-k` means "same size as every other argument of group `k`".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeFunction {
    pub name: String,
    pub args: Vec<i32>,
}

#[derive(Error, Debug)]
pub enum DescriptionError {
    #[error("invalid node description: {0}")]
    Json(#[from] serde_json::Error),
    #[error("node description \"{name}\" declares {used} words of variables but only has {max}")]
    TooManyVariables {
        name: String,
        used: usize,
        max: usize,
    },
}

/// Event id of the initialization code.
pub const INIT_EVENT_ID: u16 = 0xffff;

impl NodeDescription {
    pub fn from_json(json: &str) -> Result<Self, DescriptionError> {
        let desc: Self = serde_json::from_str(json)?;
        let used = desc.variables_size();
        // two words are reserved for the return value and the frame pointer
        if used + 2 > desc.max_var_size {
            return Err(DescriptionError::TooManyVariables {
                name: desc.name,
                used,
                max: desc.max_var_size,
            });
        }
        Ok(desc)
    }

    pub fn to_json(&self) -> Result<String, DescriptionError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Number of words taken by the predefined variables.
    pub fn variables_size(&self) -> usize {
        self.variables.iter().map(|v| v.size).sum()
    }

    /// Native function and its id.
    pub fn native(&self, name: &str) -> Option<(u16, &NativeFunction)> {
        self.native_functions
            .iter()
            .enumerate()
            .find(|(_, f)| f.name == name)
            .map(|(i, f)| (i as u16, f))
    }

    /// Local events count down from just below the init event id.
    pub fn local_event_id(&self, name: &str) -> Option<u16> {
        self.local_events
            .iter()
            .position(|e| e.name == name)
            .map(|i| INIT_EVENT_ID - 1 - i as u16)
    }

    /// Slot holding function return values (and switch subjects).
    pub const fn return_value_offset(&self) -> usize {
        self.max_var_size - 2
    }

    /// Slot holding the base address of the current function frame.
    pub const fn frame_offset(&self) -> usize {
        self.max_var_size - 1
    }

    /// Built-in description of the Thymio II robot.
    pub fn thymio() -> Self {
        const VARIABLES: &[(&str, usize)] = &[
            ("_id", 1),
            ("event.source", 1),
            ("event.args", 32),
            ("_fwversion", 2),
            ("_productId", 1),
            ("buttons._raw", 5),
            ("button.backward", 1),
            ("button.left", 1),
            ("button.center", 1),
            ("button.forward", 1),
            ("button.right", 1),
            ("buttons._mean", 5),
            ("buttons._noise", 5),
            ("prox.horizontal", 7),
            ("prox.comm.rx._payloads", 7),
            ("prox.comm.rx._intensities", 7),
            ("prox.comm.rx", 1),
            ("prox.comm.tx", 1),
            ("prox.ground.ambiant", 2),
            ("prox.ground.reflected", 2),
            ("prox.ground.delta", 2),
            ("motor.left.target", 1),
            ("motor.right.target", 1),
            ("_vbat", 2),
            ("_imot", 2),
            ("motor.left.speed", 1),
            ("motor.right.speed", 1),
            ("motor.left.pwm", 1),
            ("motor.right.pwm", 1),
            ("_integrator", 2),
            ("acc", 3),
            ("leds.top", 3),
            ("leds.bottom.left", 3),
            ("leds.bottom.right", 3),
            ("leds.circle", 8),
            ("temperature", 1),
            ("rc5.address", 1),
            ("rc5.command", 1),
            ("mic.intensity", 1),
            ("mic.threshold", 1),
            ("mic._mean", 1),
            ("timer.period", 2),
            ("acc._tap", 1),
            ("sd.present", 1),
        ];
        const EVENTS: &[&str] = &[
            "button.backward",
            "button.left",
            "button.center",
            "button.forward",
            "button.right",
            "buttons",
            "prox",
            "prox.comm",
            "tap",
            "acc",
            "mic",
            "sound.finished",
            "temperature",
            "rc5",
            "motor",
            "timer0",
            "timer1",
        ];
        const NATIVES: &[(&str, &[i32])] = &[
            ("_system_reboot", &[]),
            ("_system_settings_read", &[1, 1]),
            ("_system_settings_write", &[1, 1]),
            ("_system_settings_flash", &[]),
            ("math.copy", &[-1, -1]),
            ("math.fill", &[-1, 1]),
            ("math.addscalar", &[-1, -1, 1]),
            ("math.add", &[-1, -1, -1]),
            ("math.sub", &[-1, -1, -1]),
            ("math.mul", &[-1, -1, -1]),
            ("math.div", &[-1, -1, -1]),
            ("math.min", &[-1, -1, -1]),
            ("math.max", &[-1, -1, -1]),
            ("math.clamp", &[-1, -1, -1, -1]),
            ("math.dot", &[1, -1, -1, 1]),
            ("math.stat", &[-1, 1, 1, 1]),
            ("math.argbounds", &[-1, 1, 1]),
            ("math.sort", &[-1]),
            ("math.muldiv", &[-1, -1, -1, -1]),
            ("math.atan2", &[-1, -1, -1]),
            ("math.sin", &[-1, -1]),
            ("math.cos", &[-1, -1]),
            ("math.rot2", &[2, 2, 1]),
            ("math.sqrt", &[-1, -1]),
            ("math.rand", &[-1]),
            ("_leds.set", &[1, 1]),
            ("sound.record", &[1]),
            ("sound.play", &[1]),
            ("sound.replay", &[1]),
            ("sound.system", &[1]),
            ("leds.circle", &[1, 1, 1, 1, 1, 1, 1, 1]),
            ("leds.top", &[1, 1, 1]),
            ("leds.bottom.left", &[1, 1, 1]),
            ("leds.bottom.right", &[1, 1, 1]),
            ("sound.freq", &[1, 1]),
            ("leds.buttons", &[1, 1, 1, 1]),
            ("leds.prox.h", &[1, 1, 1, 1, 1, 1, 1, 1]),
            ("leds.prox.v", &[1, 1]),
            ("leds.rc", &[1]),
            ("leds.sound", &[1]),
            ("leds.temperature", &[1, 1]),
            ("sound.wave", &[142]),
            ("prox.comm.enable", &[1]),
            ("sd.open", &[1, 1]),
            ("sd.write", &[-1, 1]),
            ("sd.read", &[-1, 1]),
            ("sd.seek", &[1, 1]),
            ("_rf.nodeid", &[1]),
            ("_poweroff", &[]),
        ];

        Self {
            name: "thymio-II".to_string(),
            max_var_size: 620,
            variables: VARIABLES
                .iter()
                .map(|&(name, size)| VariableDescription {
                    name: name.to_string(),
                    size,
                })
                .collect(),
            local_events: EVENTS
                .iter()
                .map(|&name| EventDescription {
                    name: name.to_string(),
                })
                .collect(),
            native_functions: NATIVES
                .iter()
                .map(|&(name, args)| NativeFunction {
                    name: name.to_string(),
                    args: args.to_vec(),
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thymio_layout() {
        let thymio = NodeDescription::thymio();
        assert_eq!(thymio.variables_size(), 128);
        assert_eq!(thymio.local_event_id("button.backward"), Some(0xfffe));
        assert_eq!(thymio.local_event_id("timer1"), Some(0xfffe - 16));
        assert_eq!(thymio.native("math.muldiv").map(|(id, _)| id), Some(18));
        assert_eq!(thymio.return_value_offset(), 618);
    }

    #[test]
    fn reads_firmware_json() {
        let json = r#"{
            "name": "tiny",
            "maxVarSize": 64,
            "variables": [{"name": "a", "size": 2}],
            "nativeFunctions": [{"name": "math.fill", "args": [-1, 1]}]
        }"#;
        let desc = NodeDescription::from_json(json).unwrap();
        assert_eq!(desc.max_var_size, 64);
        assert!(desc.local_events.is_empty());
        assert_eq!(desc.native("math.fill").unwrap().1.args, vec![-1, 1]);
    }

    #[test]
    fn json_round_trips_field_names() {
        let json = NodeDescription::thymio().to_json().unwrap();
        assert!(json.contains("\"maxVarSize\": 620"));
        assert!(json.contains("\"nativeFunctions\""));
    }

    #[test]
    fn rejects_overfull_description() {
        let json = r#"{"name": "x", "maxVarSize": 3, "variables": [{"name": "a", "size": 2}]}"#;
        assert!(matches!(
            NodeDescription::from_json(json),
            Err(DescriptionError::TooManyVariables { .. })
        ));
    }
}
