//! One-shot peripheral initialization and raw register helpers.
//!
//! Configures the three ADC1 measurement channels, the valve and system-on
//! outputs, the valve current-regulator LEDC channel and the flow-sensor
//! interrupt using raw ESP-IDF sys calls.  On the host every function is a
//! no-op twin so the domain builds and tests on x86_64.

#[cfg(target_os = "espidf")]
use esp_idf_svc::sys::*;
#[cfg(target_os = "espidf")]
use log::info;

#[cfg(target_os = "espidf")]
use crate::pins;

// ── Error type ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HwInitError {
    AdcInitFailed(i32),
    GpioConfigFailed(i32),
    LedcInitFailed(i32),
    IsrInstallFailed(i32),
}

impl core::fmt::Display for HwInitError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::AdcInitFailed(rc) => write!(f, "ADC1 init failed (rc={})", rc),
            Self::GpioConfigFailed(rc) => write!(f, "GPIO config failed (rc={})", rc),
            Self::LedcInitFailed(rc) => write!(f, "LEDC timer/channel config failed (rc={})", rc),
            Self::IsrInstallFailed(rc) => write!(f, "GPIO ISR service install failed (rc={})", rc),
        }
    }
}

#[cfg(target_os = "espidf")]
fn check(ret: esp_err_t, err: fn(i32) -> HwInitError) -> Result<(), HwInitError> {
    if ret == ESP_OK as i32 { Ok(()) } else { Err(err(ret)) }
}

/// Configure ADC, flow input and the valve PWM.  Valve outputs are
/// configured later by the controller's Init state via [`configure_output`].
#[cfg(target_os = "espidf")]
pub fn init_peripherals(pwm_freq_hz: u32) -> Result<(), HwInitError> {
    // SAFETY: called once from main() before any task is spawned.
    unsafe {
        init_adc()?;
        init_flow_input()?;
        init_ledc(pwm_freq_hz)?;
    }
    info!("hw_init: all peripherals configured");
    Ok(())
}

#[cfg(not(target_os = "espidf"))]
pub fn init_peripherals(_pwm_freq_hz: u32) -> Result<(), HwInitError> {
    log::info!("hw_init(sim): peripheral init skipped");
    Ok(())
}

// ── ADC (oneshot) ─────────────────────────────────────────────

#[cfg(target_os = "espidf")]
static mut ADC1_HANDLE: adc_oneshot_unit_handle_t = core::ptr::null_mut();

/// SAFETY: the handle is written once in `init_adc()` before the
/// measurement task starts; afterwards only that task reads it.
#[cfg(target_os = "espidf")]
unsafe fn adc1_handle() -> adc_oneshot_unit_handle_t {
    unsafe { ADC1_HANDLE }
}

#[cfg(target_os = "espidf")]
unsafe fn init_adc() -> Result<(), HwInitError> {
    let init_cfg = adc_oneshot_unit_init_cfg_t {
        unit_id: adc_unit_t_ADC_UNIT_1,
        ulp_mode: adc_ulp_mode_t_ADC_ULP_MODE_DISABLE,
        ..Default::default()
    };
    // SAFETY: ADC1_HANDLE is only written here, once at boot.
    check(
        unsafe { adc_oneshot_new_unit(&init_cfg, &raw mut ADC1_HANDLE) },
        HwInitError::AdcInitFailed,
    )?;

    let chan_cfg = adc_oneshot_chan_cfg_t {
        atten: adc_atten_t_ADC_ATTEN_DB_12,
        bitwidth: adc_bitwidth_t_ADC_BITWIDTH_12,
    };
    for ch in [pins::ADC1_CH_INPUT, pins::ADC1_CH_MOTOR, pins::ADC1_CH_SUPPLY_12V] {
        check(
            unsafe { adc_oneshot_config_channel(adc1_handle(), ch, &chan_cfg) },
            HwInitError::AdcInitFailed,
        )?;
    }

    info!(
        "hw_init: ADC1 configured (CH{}=input, CH{}=motor, CH{}=12V)",
        pins::ADC1_CH_INPUT,
        pins::ADC1_CH_MOTOR,
        pins::ADC1_CH_SUPPLY_12V
    );
    Ok(())
}

/// One raw conversion; 0 on a driver error.
#[cfg(target_os = "espidf")]
pub fn adc1_read(channel: u32) -> u16 {
    let mut raw: i32 = 0;
    // SAFETY: adc1_handle() contract, measurement task only.
    let ret = unsafe { adc_oneshot_read(adc1_handle(), channel, &mut raw) };
    if ret != ESP_OK as i32 {
        return 0;
    }
    raw.max(0) as u16
}

#[cfg(not(target_os = "espidf"))]
pub fn adc1_read(_channel: u32) -> u16 {
    0
}

// ── GPIO ──────────────────────────────────────────────────────

#[cfg(target_os = "espidf")]
unsafe fn init_flow_input() -> Result<(), HwInitError> {
    let cfg = gpio_config_t {
        pin_bit_mask: 1u64 << pins::FLOW_PULSE_GPIO,
        mode: gpio_mode_t_GPIO_MODE_INPUT,
        pull_up_en: gpio_pullup_t_GPIO_PULLUP_ENABLE,
        pull_down_en: gpio_pulldown_t_GPIO_PULLDOWN_DISABLE,
        intr_type: gpio_int_type_t_GPIO_INTR_POSEDGE,
    };
    check(unsafe { gpio_config(&cfg) }, HwInitError::GpioConfigFailed)
}

/// Configure `pin` as a push-pull output driven low.
#[cfg(target_os = "espidf")]
pub fn configure_output(pin: i32) -> Result<(), HwInitError> {
    let cfg = gpio_config_t {
        pin_bit_mask: 1u64 << pin,
        mode: gpio_mode_t_GPIO_MODE_OUTPUT,
        pull_up_en: gpio_pullup_t_GPIO_PULLUP_DISABLE,
        pull_down_en: gpio_pulldown_t_GPIO_PULLDOWN_DISABLE,
        intr_type: gpio_int_type_t_GPIO_INTR_DISABLE,
    };
    // SAFETY: gpio_config only touches the pins in the mask; the controller
    // task is the sole owner of the output pins.
    check(unsafe { gpio_config(&cfg) }, HwInitError::GpioConfigFailed)?;
    unsafe { gpio_set_level(pin, 0) };
    Ok(())
}

#[cfg(not(target_os = "espidf"))]
pub fn configure_output(_pin: i32) -> Result<(), HwInitError> {
    Ok(())
}

#[cfg(target_os = "espidf")]
pub fn gpio_write(pin: i32, high: bool) {
    // SAFETY: register write to a configured output, controller task only.
    unsafe {
        gpio_set_level(pin, u32::from(high));
    }
}

#[cfg(not(target_os = "espidf"))]
pub fn gpio_write(_pin: i32, _high: bool) {}

// ── LEDC PWM ─────────────────────────────────────────────────

#[cfg(target_os = "espidf")]
unsafe fn init_ledc(freq_hz: u32) -> Result<(), HwInitError> {
    let timer = ledc_timer_config_t {
        speed_mode: ledc_mode_t_LEDC_LOW_SPEED_MODE,
        timer_num: ledc_timer_t_LEDC_TIMER_0,
        duty_resolution: ledc_timer_bit_t_LEDC_TIMER_8_BIT,
        freq_hz,
        clk_cfg: soc_periph_ledc_clk_src_legacy_t_LEDC_AUTO_CLK,
        ..Default::default()
    };
    check(unsafe { ledc_timer_config(&timer) }, HwInitError::LedcInitFailed)?;

    let channel = ledc_channel_config_t {
        speed_mode: ledc_mode_t_LEDC_LOW_SPEED_MODE,
        channel: pins::VALVE_PWM_CHANNEL,
        timer_sel: ledc_timer_t_LEDC_TIMER_0,
        gpio_num: pins::VALVE_PWM_GPIO,
        duty: 0,
        hpoint: 0,
        ..Default::default()
    };
    check(unsafe { ledc_channel_config(&channel) }, HwInitError::LedcInitFailed)?;

    info!(
        "hw_init: LEDC CH{} on GPIO{} at {} Hz",
        pins::VALVE_PWM_CHANNEL,
        pins::VALVE_PWM_GPIO,
        freq_hz
    );
    Ok(())
}

/// Percent (0–100) to an 8-bit LEDC duty.
pub fn percent_to_duty(percent: u8) -> u32 {
    let max = (1u32 << crate::pins::PWM_RESOLUTION_BITS) - 1;
    u32::from(percent.min(100)) * max / 100
}

#[cfg(target_os = "espidf")]
pub fn ledc_set(channel: u32, percent: u8) {
    // SAFETY: channel configured in init_ledc(); only the controller task
    // writes the valve PWM.
    unsafe {
        ledc_set_duty(ledc_mode_t_LEDC_LOW_SPEED_MODE, channel, percent_to_duty(percent));
        ledc_update_duty(ledc_mode_t_LEDC_LOW_SPEED_MODE, channel);
    }
}

#[cfg(not(target_os = "espidf"))]
pub fn ledc_set(_channel: u32, _percent: u8) {}

// ── GPIO ISR Service ──────────────────────────────────────────

#[cfg(target_os = "espidf")]
unsafe extern "C" fn flow_gpio_isr(_arg: *mut core::ffi::c_void) {
    crate::sensors::flow::flow_isr_handler();
}

/// Install the per-pin ISR service and hook the flow sensor.
#[cfg(target_os = "espidf")]
pub fn init_isr_service() -> Result<(), HwInitError> {
    // SAFETY: ESP_ERR_INVALID_STATE means the service is already installed.
    // The handler only touches the flow counter atomics.
    unsafe {
        let ret = gpio_install_isr_service(0);
        if ret != ESP_OK as i32 && ret != ESP_ERR_INVALID_STATE as i32 {
            return Err(HwInitError::IsrInstallFailed(ret));
        }

        check(
            gpio_isr_handler_add(pins::FLOW_PULSE_GPIO, Some(flow_gpio_isr), core::ptr::null_mut()),
            HwInitError::IsrInstallFailed,
        )?;
        gpio_intr_enable(pins::FLOW_PULSE_GPIO);
    }
    info!("hw_init: flow ISR on GPIO{}", pins::FLOW_PULSE_GPIO);
    Ok(())
}

#[cfg(not(target_os = "espidf"))]
pub fn init_isr_service() -> Result<(), HwInitError> {
    log::info!("hw_init(sim): ISR service skipped");
    Ok(())
}
