// Vulkan Device - Core GPU interface
//
// Responsibilities:
// - Instance creation with optional validation layers
// - Physical device listing and selection (compute-capable only selectable)
// - Queue family selection (prefer dedicated compute)
// - Logical device + single compute queue creation

use anyhow::{Context, Result};
use ash::{vk, Entry};
use std::ffi::{c_char, CStr, CString};
use std::sync::Arc;

use crate::prompt;

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Vulkan device wrapper with automatic cleanup
pub struct VulkanDevice {
    pub device: ash::Device,
    pub instance: ash::Instance,
    _entry: Entry,

    // Queue handles
    pub compute_queue: vk::Queue,
    pub compute_queue_family: u32,

    // Debug utils (if validation enabled)
    debug_utils: Option<(ash::extensions::ext::DebugUtils, vk::DebugUtilsMessengerEXT)>,

    // Device properties (cached, queried once)
    pub properties: vk::PhysicalDeviceProperties,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
}

/// A physical device that exposes at least one compute queue
struct Candidate {
    physical_device: vk::PhysicalDevice,
    properties: vk::PhysicalDeviceProperties,
    queue_family: u32,
}

impl VulkanDevice {
    /// Create Vulkan device
    ///
    /// # Arguments
    /// * `app_name` - Application name reported to the driver
    /// * `enable_validation` - Enable Vulkan validation layers (debug only)
    /// * `device_index` - Pre-selected device; prompts on stdin when `None`
    pub fn new(
        app_name: &str,
        enable_validation: bool,
        device_index: Option<usize>,
    ) -> Result<Arc<Self>> {
        log::info!("Creating Vulkan device: {}", app_name);

        // Step 1: Load Vulkan library
        let entry = unsafe { Entry::load() }
            .context("Failed to load Vulkan library. Is Vulkan installed?")?;

        // Step 2: Create instance
        let enable_validation = enable_validation && Self::validation_available(&entry)?;
        let instance = Self::create_instance(&entry, app_name, enable_validation)?;

        // Step 3: Setup debug messenger if validation enabled
        let debug_utils = if enable_validation {
            match Self::setup_debug_messenger(&entry, &instance) {
                Ok(pair) => Some(pair),
                Err(err) => {
                    unsafe { destroy_instance(&instance, None) };
                    return Err(err);
                }
            }
        } else {
            None
        };

        // Step 4-5: Pick physical device (GPU) and create logical device.
        // Nothing owns the instance yet, so a failure here tears it down.
        let selected = Self::pick_physical_device(&instance, device_index).and_then(|candidate| {
            let (device, queue) = Self::create_logical_device(
                &instance,
                candidate.physical_device,
                candidate.queue_family,
            )?;
            Ok((candidate, device, queue))
        });
        let (candidate, device, compute_queue) = match selected {
            Ok(selected) => selected,
            Err(err) => {
                unsafe { destroy_instance(&instance, debug_utils) };
                return Err(err);
            }
        };
        let physical_device = candidate.physical_device;
        let compute_queue_family = candidate.queue_family;

        // Step 6: Cache device properties
        let properties = candidate.properties;
        let memory_properties = unsafe {
            instance.get_physical_device_memory_properties(physical_device)
        };

        log::info!("Selected GPU: {}", device_name(&properties));
        log::info!("API Version: {}.{}.{}",
            vk::api_version_major(properties.api_version),
            vk::api_version_minor(properties.api_version),
            vk::api_version_patch(properties.api_version));
        log::info!("Compute queue family: {}", compute_queue_family);

        Ok(Arc::new(Self {
            device,
            instance,
            _entry: entry,
            compute_queue,
            compute_queue_family,
            debug_utils,
            properties,
            memory_properties,
        }))
    }

    /// Validation needs both the Khronos layer and the debug utils extension
    fn validation_available(entry: &Entry) -> Result<bool> {
        let layers = entry
            .enumerate_instance_layer_properties()
            .context("Failed to enumerate instance layers")?;
        let has_layer = layers
            .iter()
            .any(|layer| fixed_name_is(&layer.layer_name, VALIDATION_LAYER));

        let extensions = entry
            .enumerate_instance_extension_properties(None)
            .context("Failed to enumerate instance extensions")?;
        let has_debug_utils = extensions.iter().any(|ext| {
            fixed_name_is(&ext.extension_name, ash::extensions::ext::DebugUtils::name())
        });

        if !has_layer {
            log::warn!("{:?} not installed, running without validation", VALIDATION_LAYER);
        } else if !has_debug_utils {
            log::warn!("VK_EXT_debug_utils not available, running without validation");
        }

        Ok(has_layer && has_debug_utils)
    }

    fn create_instance(
        entry: &Entry,
        app_name: &str,
        enable_validation: bool,
    ) -> Result<ash::Instance> {
        let app_name_cstr = CString::new(app_name)?;

        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name_cstr)
            .application_version(0)
            .engine_version(0)
            .api_version(vk::API_VERSION_1_0);

        let (extensions, layer_names) = if enable_validation {
            (
                vec![ash::extensions::ext::DebugUtils::name().as_ptr()],
                vec![VALIDATION_LAYER.as_ptr()],
            )
        } else {
            (vec![], vec![])
        };

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_names);

        let instance = unsafe { entry.create_instance(&create_info, None) }
            .context("Failed to create Vulkan instance")?;

        Ok(instance)
    }

    fn setup_debug_messenger(
        entry: &Entry,
        instance: &ash::Instance,
    ) -> Result<(ash::extensions::ext::DebugUtils, vk::DebugUtilsMessengerEXT)> {
        let debug_utils = ash::extensions::ext::DebugUtils::new(entry, instance);

        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                    | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                    | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        let messenger = unsafe {
            debug_utils.create_debug_utils_messenger(&create_info, None)
        }
        .context("Failed to create debug messenger")?;

        Ok((debug_utils, messenger))
    }

    fn pick_physical_device(
        instance: &ash::Instance,
        device_index: Option<usize>,
    ) -> Result<Candidate> {
        let devices = unsafe { instance.enumerate_physical_devices() }
            .context("Failed to enumerate physical devices")?;

        if devices.is_empty() {
            anyhow::bail!("No Vulkan-capable GPU found");
        }

        // Every device is listed under its enumeration index; only those with
        // a compute queue can be chosen.
        let mut listed = Vec::with_capacity(devices.len());
        for (index, device) in devices.into_iter().enumerate() {
            let properties = unsafe { instance.get_physical_device_properties(device) };
            let queue_families = unsafe {
                instance.get_physical_device_queue_family_properties(device)
            };

            println!("{}", describe_device(index, &properties));
            let queue_family = choose_queue_family_index(&queue_families);
            if queue_family.is_none() {
                log::warn!(
                    "Device {} ({}) has no queue with compute capabilities",
                    index,
                    device_name(&properties)
                );
            }
            listed.push((device, properties, queue_family));
        }

        let selectable: Vec<bool> = listed.iter().map(|(_, _, family)| family.is_some()).collect();
        if !selectable.contains(&true) {
            anyhow::bail!("Could not find any queue on any device with compute capabilities");
        }

        let stdin = std::io::stdin();
        let index = prompt::choose_physical_device_index(
            &selectable,
            device_index,
            &mut stdin.lock(),
            &mut std::io::stdout(),
            &mut std::io::stderr(),
        )?;

        let (physical_device, properties, queue_family) = listed.swap_remove(index);
        Ok(Candidate {
            physical_device,
            properties,
            queue_family: queue_family.context("Chosen device has no compute queue")?,
        })
    }

    fn create_logical_device(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        compute_queue_family: u32,
    ) -> Result<(ash::Device, vk::Queue)> {
        let queue_priorities = [1.0];
        let queue_create_info = vk::DeviceQueueCreateInfo::builder()
            .queue_family_index(compute_queue_family)
            .queue_priorities(&queue_priorities)
            .build();

        // No extensions, no features: plain storage buffers only
        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(std::slice::from_ref(&queue_create_info));

        let device = unsafe {
            instance.create_device(physical_device, &create_info, None)
        }
        .context("Failed to create logical device")?;

        let compute_queue = unsafe {
            device.get_device_queue(compute_queue_family, 0)
        };

        Ok((device, compute_queue))
    }

    /// Wait for device to be idle (e.g., before cleanup)
    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle() }?;
        Ok(())
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan device...");

        // Wait for device to finish
        let _ = self.wait_idle();

        // Cleanup in reverse order
        unsafe {
            self.device.destroy_device(None);
            destroy_instance(&self.instance, self.debug_utils.take());
        }
    }
}

/// Destroy the debug messenger (if any), then the instance
unsafe fn destroy_instance(
    instance: &ash::Instance,
    debug_utils: Option<(ash::extensions::ext::DebugUtils, vk::DebugUtilsMessengerEXT)>,
) {
    if let Some((debug_utils, messenger)) = debug_utils {
        debug_utils.destroy_debug_utils_messenger(messenger, None);
    }
    instance.destroy_instance(None);
}

/// Compare a fixed-size, NUL-padded name from a Vulkan properties struct.
/// A name that fills the whole array without a terminator is compared as-is.
fn fixed_name_is(raw: &[c_char], wanted: &CStr) -> bool {
    raw.iter()
        .map(|&c| c as u8)
        .take_while(|&b| b != 0)
        .eq(wanted.to_bytes().iter().copied())
}

/// Pick a queue family for compute work.
///
/// A compute-only family (no graphics) wins; otherwise the first family
/// that supports compute at all.
pub fn choose_queue_family_index(families: &[vk::QueueFamilyProperties]) -> Option<u32> {
    let supports_compute =
        |props: &vk::QueueFamilyProperties| props.queue_flags.contains(vk::QueueFlags::COMPUTE);

    families
        .iter()
        .position(|props| {
            supports_compute(props) && !props.queue_flags.contains(vk::QueueFlags::GRAPHICS)
        })
        .or_else(|| families.iter().position(supports_compute))
        .map(|index| index as u32)
}

/// Human-readable name of a physical device type
pub fn device_type_name(device_type: vk::PhysicalDeviceType) -> &'static str {
    match device_type {
        vk::PhysicalDeviceType::OTHER => "Other",
        vk::PhysicalDeviceType::INTEGRATED_GPU => "Integrated GPU",
        vk::PhysicalDeviceType::DISCRETE_GPU => "Discrete GPU",
        vk::PhysicalDeviceType::VIRTUAL_GPU => "Virtual GPU",
        vk::PhysicalDeviceType::CPU => "CPU",
        _ => "Undefined",
    }
}

fn device_name(properties: &vk::PhysicalDeviceProperties) -> String {
    unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }
        .to_string_lossy()
        .into_owned()
}

/// Multi-line listing entry for one physical device
pub fn describe_device(index: usize, properties: &vk::PhysicalDeviceProperties) -> String {
    let name = device_name(properties);
    format!(
        "{}: {} {{\n\tapiVersion: {}.{}.{}\n\tdriverVersion: {}\n\tvendorID: {}\n\tdeviceID: {}\n\tdeviceType: {}\n\tdeviceName: {}\n}}",
        index,
        name,
        vk::api_version_major(properties.api_version),
        vk::api_version_minor(properties.api_version),
        vk::api_version_patch(properties.api_version),
        properties.driver_version,
        properties.vendor_id,
        properties.device_id,
        device_type_name(properties.device_type),
        name,
    )
}

/// Short tag list for a debug message, e.g. `W|P`.
///
/// Severity bits nobody knows about show up as `?`.
pub fn message_prefix(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
) -> String {
    use vk::DebugUtilsMessageSeverityFlagsEXT as Severity;

    let known = Severity::VERBOSE | Severity::INFO | Severity::WARNING | Severity::ERROR;
    let tags = [
        (severity.contains(Severity::INFO), "I"),
        (severity.contains(Severity::WARNING), "W"),
        (message_type.contains(vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE), "P"),
        (severity.contains(Severity::ERROR), "E"),
        (severity.contains(Severity::VERBOSE), "D"),
        (severity.as_raw() & !known.as_raw() != 0, "?"),
    ];

    tags.iter()
        .filter(|(set, _)| *set)
        .map(|(_, tag)| *tag)
        .collect::<Vec<_>>()
        .join("|")
}

// Debug callback for validation layers
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    let message = if p_callback_data.is_null() || (*p_callback_data).p_message.is_null() {
        std::borrow::Cow::Borrowed("<no message>")
    } else {
        CStr::from_ptr((*p_callback_data).p_message as *const c_char).to_string_lossy()
    };
    let prefix = message_prefix(message_severity, message_type);

    log::log!(log_level_for(message_severity), "[{}] {}", prefix, message);

    vk::FALSE
}

/// `log` level for a debug message; the most severe bit wins
fn log_level_for(severity: vk::DebugUtilsMessageSeverityFlagsEXT) -> log::Level {
    use vk::DebugUtilsMessageSeverityFlagsEXT as Severity;

    if severity.contains(Severity::ERROR) {
        log::Level::Error
    } else if severity.contains(Severity::WARNING) {
        log::Level::Warn
    } else if severity.contains(Severity::INFO) {
        log::Level::Info
    } else if severity.contains(Severity::VERBOSE) {
        log::Level::Debug
    } else {
        log::Level::Trace
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    #[test]
    fn dedicated_compute_family_preferred() {
        let families = [
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE),
            family(vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER),
        ];
        assert_eq!(choose_queue_family_index(&families), Some(2));
    }

    #[test]
    fn falls_back_to_first_compute_family() {
        let families = [
            family(vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER),
        ];
        assert_eq!(choose_queue_family_index(&families), Some(1));
    }

    #[test]
    fn no_compute_family() {
        let families = [family(vk::QueueFlags::GRAPHICS), family(vk::QueueFlags::TRANSFER)];
        assert_eq!(choose_queue_family_index(&families), None);
        assert_eq!(choose_queue_family_index(&[]), None);
    }

    #[test]
    fn device_type_names() {
        assert_eq!(device_type_name(vk::PhysicalDeviceType::DISCRETE_GPU), "Discrete GPU");
        assert_eq!(device_type_name(vk::PhysicalDeviceType::CPU), "CPU");
        assert_eq!(device_type_name(vk::PhysicalDeviceType::from_raw(42)), "Undefined");
    }

    #[test]
    fn device_description_lists_fields() {
        let mut properties = vk::PhysicalDeviceProperties {
            api_version: vk::make_api_version(0, 1, 3, 250),
            driver_version: 7,
            vendor_id: 4318,
            device_id: 9,
            device_type: vk::PhysicalDeviceType::INTEGRATED_GPU,
            ..Default::default()
        };
        for (dst, src) in properties.device_name.iter_mut().zip(b"Test GPU") {
            *dst = *src as c_char;
        }

        let text = describe_device(1, &properties);
        assert!(text.starts_with("1: Test GPU {\n"));
        assert!(text.contains("\tapiVersion: 1.3.250\n"));
        assert!(text.contains("\tvendorID: 4318\n"));
        assert!(text.contains("\tdeviceType: Integrated GPU\n"));
        assert!(text.ends_with("\tdeviceName: Test GPU\n}"));
    }

    #[test]
    fn message_prefix_tags() {
        use vk::DebugUtilsMessageSeverityFlagsEXT as Severity;
        use vk::DebugUtilsMessageTypeFlagsEXT as Type;

        assert_eq!(message_prefix(Severity::WARNING, Type::PERFORMANCE), "W|P");
        assert_eq!(message_prefix(Severity::ERROR, Type::VALIDATION), "E");
        assert_eq!(message_prefix(Severity::VERBOSE, Type::GENERAL), "D");
        assert_eq!(
            message_prefix(Severity::INFO | Severity::from_raw(0x8000), Type::GENERAL),
            "I|?"
        );
    }

    #[test]
    fn severity_maps_to_log_level() {
        use vk::DebugUtilsMessageSeverityFlagsEXT as Severity;

        assert_eq!(log_level_for(Severity::ERROR), log::Level::Error);
        assert_eq!(log_level_for(Severity::WARNING), log::Level::Warn);
        assert_eq!(log_level_for(Severity::INFO), log::Level::Info);
        assert_eq!(log_level_for(Severity::VERBOSE), log::Level::Debug);
        assert_eq!(log_level_for(Severity::from_raw(0x8000)), log::Level::Trace);
        assert_eq!(log_level_for(Severity::INFO | Severity::ERROR), log::Level::Error);
    }

    fn padded(name: &[u8]) -> [c_char; vk::MAX_EXTENSION_NAME_SIZE] {
        let mut raw = [0 as c_char; vk::MAX_EXTENSION_NAME_SIZE];
        for (dst, src) in raw.iter_mut().zip(name) {
            *dst = *src as c_char;
        }
        raw
    }

    #[test]
    fn layer_and_extension_names_compare_by_content() {
        let layer = vk::LayerProperties {
            layer_name: padded(b"VK_LAYER_KHRONOS_validation"),
            ..Default::default()
        };
        assert!(fixed_name_is(&layer.layer_name, VALIDATION_LAYER));
        assert!(!fixed_name_is(&padded(b"VK_LAYER_KHRONOS"), VALIDATION_LAYER));
        assert!(!fixed_name_is(&padded(b"VK_LAYER_KHRONOS_validation2"), VALIDATION_LAYER));

        let ext = vk::ExtensionProperties {
            extension_name: padded(b"VK_EXT_debug_utils"),
            ..Default::default()
        };
        assert!(fixed_name_is(
            &ext.extension_name,
            ash::extensions::ext::DebugUtils::name()
        ));
        assert!(fixed_name_is(&padded(b""), c""));
    }

    #[test]
    fn unterminated_name_does_not_overrun() {
        let raw = [b'A' as c_char; 4];
        assert!(fixed_name_is(&raw, c"AAAA"));
        assert!(!fixed_name_is(&raw, c"AAAAA"));
    }

    // Validation reports the instance as leaked if the error path skips teardown
    #[test]
    #[ignore = "requires a Vulkan loader"]
    fn bad_device_index_fails_cleanly() {
        assert!(VulkanDevice::new("vkcscratch-test", true, Some(usize::MAX)).is_err());
    }
}
