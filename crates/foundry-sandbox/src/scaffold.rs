//! Build file scaffolding
//!
//! Generated code rarely includes a build descriptor. When none of the
//! artifacts provides one, a default Spring Boot + MyBatis-Plus descriptor
//! is added so the sandbox can compile the project.

use foundry_core::{Artifact, GeneratedBy, Job};

pub const DEFAULT_GROUP_ID: &str = "com.foundry.generated";
pub const DEFAULT_ARTIFACT_ID: &str = "generated-app";

/// Default Maven descriptor for generated backends
pub fn default_pom() -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<project xmlns="http://maven.apache.org/POM/4.0.0"
         xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance"
         xsi:schemaLocation="http://maven.apache.org/POM/4.0.0 https://maven.apache.org/xsd/maven-4.0.0.xsd">
    <modelVersion>4.0.0</modelVersion>

    <parent>
        <groupId>org.springframework.boot</groupId>
        <artifactId>spring-boot-starter-parent</artifactId>
        <version>3.4.0</version>
        <relativePath/>
    </parent>

    <groupId>{DEFAULT_GROUP_ID}</groupId>
    <artifactId>{DEFAULT_ARTIFACT_ID}</artifactId>
    <version>1.0.0-SNAPSHOT</version>
    <packaging>jar</packaging>

    <properties>
        <java.version>17</java.version>
        <mybatis-plus.version>3.5.8</mybatis-plus.version>
    </properties>

    <dependencies>
        <dependency>
            <groupId>org.springframework.boot</groupId>
            <artifactId>spring-boot-starter-web</artifactId>
        </dependency>
        <dependency>
            <groupId>org.springframework.boot</groupId>
            <artifactId>spring-boot-starter-validation</artifactId>
        </dependency>
        <dependency>
            <groupId>com.baomidou</groupId>
            <artifactId>mybatis-plus-spring-boot3-starter</artifactId>
            <version>${{mybatis-plus.version}}</version>
        </dependency>
        <dependency>
            <groupId>org.postgresql</groupId>
            <artifactId>postgresql</artifactId>
            <scope>runtime</scope>
        </dependency>
        <dependency>
            <groupId>org.projectlombok</groupId>
            <artifactId>lombok</artifactId>
            <optional>true</optional>
        </dependency>
    </dependencies>

    <build>
        <plugins>
            <plugin>
                <groupId>org.springframework.boot</groupId>
                <artifactId>spring-boot-maven-plugin</artifactId>
                <configuration>
                    <excludes>
                        <exclude>
                            <groupId>org.projectlombok</groupId>
                            <artifactId>lombok</artifactId>
                        </exclude>
                    </excludes>
                </configuration>
            </plugin>
        </plugins>
    </build>
</project>
"#
    )
}

/// Returns the artifacts with a build file appended when none is present.
///
/// The scaffolded file is tagged [`GeneratedBy::System`] and carries the
/// job's current round.
pub fn ensure_build_file(job: &Job, artifacts: &[Artifact], build_file: &str) -> Vec<Artifact> {
    let mut prepared = artifacts.to_vec();
    if prepared.iter().any(|a| a.file_name() == build_file) {
        return prepared;
    }
    prepared.push(Artifact::new(
        job.id,
        build_file,
        default_pom(),
        job.current_round,
        GeneratedBy::System,
    ));
    prepared
}
