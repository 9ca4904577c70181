//! Logical names for every form control and overlay the flow touches.

// Registration type
pub const REGISTERING_FOR_CUSTOMER: &str = "Registering On Behalf Of Customer";

// Products
pub const SERIAL_NUMBER: &str = "Serial Number";
pub const ADD_PRODUCT: &str = "Add Another Product";
pub const ALREADY_REGISTERED_NOTICE: &str = "Already Registered Notice";
pub const INVALID_SERIAL_NOTICE: &str = "Invalid Serial Notice";

// Install metadata
pub const INSTALLATION_DATE: &str = "Installation Date";
pub const RESIDENTIAL: &str = "Residential";
pub const OWNER_OCCUPIED: &str = "Owner Occupied";

// Page navigation
pub const NEXT: &str = "Next";
pub const CONTINUE: &str = "Continue";

// Customer
pub const FIRST_NAME: &str = "First Name";
pub const LAST_NAME: &str = "Last Name";
pub const PHONE: &str = "Phone";
pub const EMAIL: &str = "Email";
pub const ADDRESS: &str = "Address";
pub const ZIP: &str = "Zip/Postal Code";
pub const CITY: &str = "City";
pub const STATE: &str = "State/Province";
pub const CONSENT: &str = "Consent";

// Dealer
pub const DEALER_ZIP: &str = "Dealer Zip";
pub const DEALER_NAME: &str = "Dealer Name";
pub const DEALER_ADDRESS: &str = "Dealer Address";
pub const DEALER_CITY: &str = "Dealer City";
pub const DEALER_STATE: &str = "Dealer State";
pub const DEALER_PHONE: &str = "Dealer Phone";

// Completion
pub const REGISTER: &str = "Register";
pub const AFFIRM: &str = "Affirm";
pub const FINAL_YES: &str = "Yes";
pub const DOWNLOAD_CERTIFICATE: &str = "Download Certificate";

// Overlays
pub const COOKIE_BANNER: &str = "Cookie Banner";
pub const COOKIE_ACCEPT: &str = "Cookie Accept";
pub const CONTRACTOR_DIALOG: &str = "Installing Contractor Dialog";
pub const CONTRACTOR_DISMISS: &str = "Installing Contractor Dismiss";
pub const ADDRESS_DIALOG: &str = "Address Confirmation Dialog";
pub const ADDRESS_CONFIRM: &str = "Address Confirmation Accept";
pub const ACK_DIALOG: &str = "Acknowledgement Dialog";
pub const ACK_OK: &str = "Acknowledgement OK";
pub const CONFIRM_DIALOG: &str = "Final Confirmation Dialog";
pub const CONFIRM_YES: &str = "Final Confirmation Yes";
