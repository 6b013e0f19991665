use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair, PKCS_RSA_SHA256};
use webfront_common::{Result, WebfrontError};

/// PEM 编码的 CSR 与未加密私钥
#[derive(Debug, Clone)]
pub struct CsrBundle {
    pub csr_pem: String,
    pub private_key_pem: String,
}

/// Generates an RSA-2048 key and a SHA-256 signed CSR.
///
/// The subject CN is the first domain; every domain is listed as a DNS SAN.
pub fn generate_csr(domains: &[String]) -> Result<CsrBundle> {
    let primary = domains
        .first()
        .ok_or_else(|| WebfrontError::validation("at least one domain is required"))?;

    let key_pair = KeyPair::generate_for(&PKCS_RSA_SHA256)
        .map_err(|e| WebfrontError::issuance(format!("failed to generate RSA key: {}", e)))?;

    let mut params = CertificateParams::new(domains.to_vec())
        .map_err(|e| WebfrontError::issuance(format!("failed to build CSR params: {}", e)))?;
    let mut subject = DistinguishedName::new();
    subject.push(DnType::CommonName, primary.clone());
    params.distinguished_name = subject;

    let csr_pem = params
        .serialize_request(&key_pair)
        .and_then(|csr| csr.pem())
        .map_err(|e| WebfrontError::issuance(format!("failed to serialize CSR: {}", e)))?;

    Ok(CsrBundle {
        csr_pem,
        private_key_pem: key_pair.serialize_pem(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use x509_parser::certification_request::X509CertificationRequest;
    use x509_parser::extensions::{GeneralName, ParsedExtension};
    use x509_parser::oid_registry::OID_PKCS1_SHA256WITHRSA;
    use x509_parser::pem::parse_x509_pem;
    use x509_parser::prelude::FromDer;

    #[test]
    fn csr_carries_cn_and_all_sans() {
        let domains = vec!["a.example.com".to_string(), "www.a.example.com".to_string()];
        let bundle = generate_csr(&domains).unwrap();

        assert!(bundle.csr_pem.contains("BEGIN CERTIFICATE REQUEST"));
        assert!(bundle.private_key_pem.contains("PRIVATE KEY"));
        assert!(!bundle.private_key_pem.contains("ENCRYPTED"));

        let (_, pem) = parse_x509_pem(bundle.csr_pem.as_bytes()).unwrap();
        let (_, csr) = X509CertificationRequest::from_der(&pem.contents).unwrap();

        let cn = csr
            .certification_request_info
            .subject
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
            .unwrap();
        assert_eq!(cn, "a.example.com");
        assert_eq!(csr.signature_algorithm.algorithm, OID_PKCS1_SHA256WITHRSA);

        let mut sans = Vec::new();
        for ext in csr.requested_extensions().into_iter().flatten() {
            if let ParsedExtension::SubjectAlternativeName(san) = ext {
                for name in &san.general_names {
                    if let GeneralName::DNSName(dns) = name {
                        sans.push(dns.to_string());
                    }
                }
            }
        }
        assert_eq!(sans, domains);
    }

    #[test]
    fn csr_requires_a_domain() {
        assert!(matches!(
            generate_csr(&[]),
            Err(WebfrontError::Validation(_))
        ));
    }
}
