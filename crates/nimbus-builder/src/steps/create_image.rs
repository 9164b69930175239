use async_trait::async_trait;
use chrono::{DateTime, Utc};
use nimbus_multistep::{StateBag, Step, StepAction};
use tracing::info;

use crate::cloud_client::SaveInstance;
use crate::error::{BuildError, Result, TemplateError};
use crate::keys::{CANCEL, CLOUD_CLIENT, CLOUD_CONF, CONFIG, IMAGE, INSTANCE_ID, UI};
use crate::template::Template;

const READS: &[&str] = &[
    CONFIG.name(),
    UI.name(),
    CLOUD_CLIENT.name(),
    CANCEL.name(),
    CLOUD_CONF.name(),
];
const WRITES: &[&str] = &[IMAGE.name()];

/// Render an `image_name` template with `CreateTime` set to `created` in
/// unix seconds.
pub fn render_image_name(
    template: &Template,
    created: DateTime<Utc>,
) -> std::result::Result<String, TemplateError> {
    let create_time = created.timestamp().to_string();
    template.render(|field| (field == "CreateTime").then(|| create_time.clone()))
}

/// Captures the provisioned instance as a new image.
#[derive(Debug)]
pub struct StepCreateImage {
    clock: fn() -> DateTime<Utc>,
}

impl Default for StepCreateImage {
    fn default() -> Self {
        Self { clock: Utc::now }
    }
}

impl StepCreateImage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `clock` instead of the system time for `CreateTime`.
    pub fn with_clock(clock: fn() -> DateTime<Utc>) -> Self {
        Self { clock }
    }

    async fn run(&self, state: &StateBag) -> Result<()> {
        let config = state.get(CONFIG)?;
        let ui = state.get(UI)?;
        let client = state.get(CLOUD_CLIENT)?;
        let cancel = state.get(CANCEL)?;
        let conf = state.get(CLOUD_CONF)?;
        let instance_id = state
            .get_ok(INSTANCE_ID)
            .ok_or(BuildError::InstanceUnknown("instance id"))?;

        let name = render_image_name(config.image_name(), (self.clock)())?;
        ui.say(&format!("Creating the image: {name}"));
        client
            .save(
                SaveInstance {
                    conf: &conf,
                    handle: &instance_id,
                    new_name: &name,
                    common: config.public_image,
                },
                &cancel,
            )
            .await
            .map_err(BuildError::CreateImage)?;

        info!(image = %name, instance_id = %instance_id, "image captured");
        state.put(IMAGE, name);
        Ok(())
    }
}

#[async_trait]
impl Step for StepCreateImage {
    fn name(&self) -> &str {
        "create_image"
    }

    fn reads(&self) -> &'static [&'static str] {
        READS
    }

    fn writes(&self) -> &'static [&'static str] {
        WRITES
    }

    async fn execute(&mut self, state: &StateBag) -> StepAction {
        match self.run(state).await {
            Ok(()) => StepAction::Continue,
            Err(err) => super::fail(state, self.name(), err),
        }
    }
}
