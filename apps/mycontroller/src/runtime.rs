//! 组件装配与启停顺序。
//!
//! 启动：总线 → 调度器 → 存储 → 密钥 → 变量/模板/Webhook → 各服务 → 监听器 →
//! 系统作业 → 调度器启动 → 各服务 `load_all`。关停按相反顺序进行。

use crate::error::AppError;
use mc_bus::{Bus, EmbeddedBus, QueueListener};
use mc_config::{BusConfig, GatewayServiceConfig, HandlerServiceConfig, ServerConfig};
use mc_crypto::SecretCipher;
use mc_gateway::{GatewayContext, GatewayService};
use mc_handler::{HandlerContext, HandlerListeners, HandlerService};
use mc_processor::MessageProcessor;
use mc_resource::{ResourceContext, ResourceService};
use mc_schedule::{ScheduleContext, ScheduleService};
use mc_scheduler::CoreScheduler;
use mc_script::{TemplateEngine, WebhookClient};
use mc_storage::{DirFirmwareStore, EntityApi, InMemoryMetricStore, MetricStore, VoidMetricStore};
use mc_system_jobs::{SystemJobs, SystemJobsContext};
use mc_task::{TaskContext, TaskEngine, TaskListeners};
use mc_variable::VariableEngine;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

const EMBEDDED_BUS: &str = "embedded";
/// 内存时序库每个字段保留的样本数。
const METRIC_SAMPLES_PER_FIELD: usize = 1000;

/// 按配置创建总线；目前只支持内嵌总线。
pub fn create_bus(config: &BusConfig) -> Result<Arc<dyn Bus>, AppError> {
    if !config.bus_type.trim().is_empty() && !config.bus_type.eq_ignore_ascii_case(EMBEDDED_BUS) {
        return Err(AppError::UnsupportedBus(config.bus_type.clone()));
    }
    let capacity = config.queue_capacity.max(1);
    info!(
        target: "mc.runtime",
        topic_prefix = %config.topic_prefix,
        queue_capacity = capacity,
        "bus_created"
    );
    Ok(Arc::new(EmbeddedBus::new(config.topic_prefix.clone(), capacity)))
}

fn create_cipher(secret: &str) -> Result<SecretCipher, AppError> {
    Ok(SecretCipher::new(secret)?)
}

/// `server` 的全部组件。
pub struct ServerRuntime {
    bus: Arc<dyn Bus>,
    scheduler: Arc<CoreScheduler>,
    api: EntityApi,
    resource: Arc<ResourceService>,
    gateway: Arc<GatewayService>,
    handler: Arc<HandlerService>,
    tasks: Arc<TaskEngine>,
    schedules: Arc<ScheduleService>,
    system_jobs: Arc<SystemJobs>,
    listeners: ServerListeners,
}

struct ServerListeners {
    resource: QueueListener,
    processor: QueueListener,
    gateway: QueueListener,
    handler: HandlerListeners,
    tasks: TaskListeners,
    schedules: QueueListener,
    system_jobs: QueueListener,
}

impl ServerRuntime {
    pub async fn start(config: &ServerConfig) -> Result<Self, AppError> {
        let bus = create_bus(&config.bus)?;
        Self::start_with_bus(config, bus).await
    }

    pub async fn start_with_bus(config: &ServerConfig, bus: Arc<dyn Bus>) -> Result<Self, AppError> {
        let capacity = config.bus.queue_capacity.max(1);
        let data_dir = PathBuf::from(&config.directories.data);
        let logs_dir = PathBuf::from(&config.directories.logs);
        tokio::fs::create_dir_all(&data_dir).await?;
        tokio::fs::create_dir_all(&logs_dir).await?;

        let scheduler = Arc::new(CoreScheduler::new());

        // 存储：实体在内存中，固件内容落在数据目录
        let metric: Arc<dyn MetricStore> = if config.database.metric_disabled() {
            Arc::new(VoidMetricStore)
        } else {
            Arc::new(InMemoryMetricStore::new(METRIC_SAMPLES_PER_FIELD))
        };
        let api = EntityApi::with_stores(bus.clone(), metric, Arc::new(DirFirmwareStore::new(&data_dir)));

        let cipher = create_cipher(&config.secret)?;
        let webhook = WebhookClient::new()?;
        let templates = TemplateEngine::new(crate::VERSION, config.system.location);
        let variables = VariableEngine::new(api.clone(), templates, webhook.clone(), Some(cipher.clone()));

        let resource = Arc::new(ResourceService::new(ResourceContext {
            bus: bus.clone(),
            api: api.clone(),
            scheduler: scheduler.clone(),
        }));
        let processor = Arc::new(MessageProcessor::new(api.clone(), bus.clone()));
        let gateway = Arc::new(GatewayService::new(
            GatewayContext {
                bus: bus.clone(),
                scheduler: scheduler.clone(),
                webhook: webhook.clone(),
                logs_dir: logs_dir.join("gateway_logs"),
            },
            Some(cipher.clone()),
            config.gateway.clone(),
        ));
        let handler = Arc::new(HandlerService::new(
            HandlerContext {
                bus: bus.clone(),
                webhook: webhook.clone(),
                api: Some(api.clone()),
            },
            Some(cipher.clone()),
            config.handler.clone(),
        ));
        let tasks = Arc::new(TaskEngine::new(
            TaskContext {
                bus: bus.clone(),
                scheduler: scheduler.clone(),
                variables: variables.clone(),
                webhook: webhook.clone(),
            },
            config.task.clone(),
        ));
        let schedules = Arc::new(ScheduleService::new(
            ScheduleContext {
                bus: bus.clone(),
                scheduler: scheduler.clone(),
                variables,
                webhook,
                location: config.system.location,
            },
            config.schedule.clone(),
        ));
        let system_jobs = Arc::new(SystemJobs::new(
            SystemJobsContext {
                bus: bus.clone(),
                api: api.clone(),
                scheduler: scheduler.clone(),
            },
            config.system.jobs.clone(),
            config.telemetry.enabled,
        ));

        // 监听器须在 load_all 之前建立
        let listeners = ServerListeners {
            resource: resource.start_listener(capacity)?,
            processor: processor.start_listener(capacity)?,
            gateway: gateway.start_listeners(capacity)?,
            handler: handler.start_listeners(capacity)?,
            tasks: tasks.start_listeners(capacity)?,
            schedules: schedules.start_listener(capacity)?,
            system_jobs: system_jobs.start_listener(capacity)?,
        };

        system_jobs.install()?;
        scheduler.start();

        gateway.load_all()?;
        handler.load_all()?;
        tasks.load_all()?;
        schedules.load_all()?;
        info!(target: "mc.runtime", "server_started");

        Ok(Self {
            bus,
            scheduler,
            api,
            resource,
            gateway,
            handler,
            tasks,
            schedules,
            system_jobs,
            listeners,
        })
    }

    pub fn bus(&self) -> Arc<dyn Bus> {
        self.bus.clone()
    }

    pub fn api(&self) -> &EntityApi {
        &self.api
    }

    pub fn scheduler(&self) -> &Arc<CoreScheduler> {
        &self.scheduler
    }

    pub fn gateway(&self) -> &Arc<GatewayService> {
        &self.gateway
    }

    pub fn handler(&self) -> &Arc<HandlerService> {
        &self.handler
    }

    pub fn tasks(&self) -> &Arc<TaskEngine> {
        &self.tasks
    }

    pub fn schedules(&self) -> &Arc<ScheduleService> {
        &self.schedules
    }

    pub async fn shutdown(self) {
        self.system_jobs.close();
        self.schedules.unload_all();
        self.tasks.unload_all();
        self.handler.unload_all().await;
        self.gateway.unload_all().await;
        self.resource.close();

        let listeners = &self.listeners;
        listeners.system_jobs.close().await;
        listeners.schedules.close().await;
        listeners.tasks.close().await;
        listeners.handler.close().await;
        listeners.gateway.close().await;
        listeners.processor.close().await;
        listeners.resource.close().await;

        self.scheduler.close();
        self.bus.close().await;
        info!(target: "mc.runtime", "server_stopped");
    }
}

/// 独立网关进程。
pub struct GatewayRuntime {
    bus: Arc<dyn Bus>,
    scheduler: Arc<CoreScheduler>,
    gateway: Arc<GatewayService>,
    listener: QueueListener,
}

impl GatewayRuntime {
    pub async fn start(config: &GatewayServiceConfig) -> Result<Self, AppError> {
        let bus = create_bus(&config.bus)?;
        let logs_dir = PathBuf::from(&config.directories.logs);
        tokio::fs::create_dir_all(&logs_dir).await?;

        let scheduler = Arc::new(CoreScheduler::new());
        let cipher = create_cipher(&config.secret)?;
        let gateway = Arc::new(GatewayService::new(
            GatewayContext {
                bus: bus.clone(),
                scheduler: scheduler.clone(),
                webhook: WebhookClient::new()?,
                logs_dir: logs_dir.join("gateway_logs"),
            },
            Some(cipher),
            config.gateway.clone(),
        ));
        let listener = gateway.start_listeners(config.bus.queue_capacity.max(1))?;
        scheduler.start();
        gateway.load_all()?;
        info!(target: "mc.runtime", "gateway_service_started");
        Ok(Self {
            bus,
            scheduler,
            gateway,
            listener,
        })
    }

    pub fn bus(&self) -> Arc<dyn Bus> {
        self.bus.clone()
    }

    pub async fn shutdown(self) {
        self.gateway.unload_all().await;
        self.listener.close().await;
        self.scheduler.close();
        self.bus.close().await;
        info!(target: "mc.runtime", "gateway_service_stopped");
    }
}

/// 独立处理器进程；没有存储，备份类处理器不可用。
pub struct HandlerRuntime {
    bus: Arc<dyn Bus>,
    handler: Arc<HandlerService>,
    listeners: HandlerListeners,
}

impl HandlerRuntime {
    pub async fn start(config: &HandlerServiceConfig) -> Result<Self, AppError> {
        let bus = create_bus(&config.bus)?;
        let cipher = create_cipher(&config.secret)?;
        let handler = Arc::new(HandlerService::new(
            HandlerContext {
                bus: bus.clone(),
                webhook: WebhookClient::new()?,
                api: None,
            },
            Some(cipher),
            config.handler.clone(),
        ));
        let listeners = handler.start_listeners(config.bus.queue_capacity.max(1))?;
        handler.load_all()?;
        info!(target: "mc.runtime", "handler_service_started");
        Ok(Self {
            bus,
            handler,
            listeners,
        })
    }

    pub fn bus(&self) -> Arc<dyn Bus> {
        self.bus.clone()
    }

    pub async fn shutdown(self) {
        self.handler.unload_all().await;
        self.listeners.close().await;
        self.bus.close().await;
        info!(target: "mc.runtime", "handler_service_stopped");
    }
}
